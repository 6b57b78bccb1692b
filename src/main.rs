use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use mixsweep::logging::init_logging;
use mixsweep::{Error, SweepArgs, SweepController};
use tracing::info;

#[derive(Parser)]
#[command(name = "mixsweep")]
#[command(about = "Train image classifiers with mixup across datasets, iterations and trials", long_about = None)]
struct Cli {
    #[command(flatten)]
    sweep: SweepArgs,

    /// More log output (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Errors only, no progress bars
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.json_logs)?;

    let mut config = cli.sweep.load().context("Failed to load configuration")?;
    if cli.quiet {
        config.progress = false;
    }

    let controller = SweepController::new(config).context("Invalid sweep configuration")?;
    match controller.run() {
        Ok(experiments) => {
            info!("Sweep complete: {} experiment(s)", experiments.len());
            for experiment in &experiments {
                info!(
                    "{}: best accuracy {:.3}% after {} epoch(s), log {}",
                    experiment.key,
                    experiment.best_accuracy,
                    experiment.epochs_run,
                    experiment.log_path.display()
                );
            }
            Ok(())
        }
        Err(Error::NoDatasets { root }) => {
            eprintln!(
                "No datasets found under {}. Add one directory per dataset, each with \
                 train/<class>/ and test/<class>/ image folders.",
                root.display()
            );
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Sweep failed"),
    }
}
