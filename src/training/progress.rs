//! Per-batch progress bars for Train and Evaluate passes

use indicatif::{ProgressBar, ProgressStyle};

use super::metrics::RunningTotals;

pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a progress reporter with a known number of batches
    pub fn new_with_total(message: &str, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{prefix:>12} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▇▆▅▄▃▂▁  ");
        bar.set_style(style);
        bar.set_prefix(message.to_string());
        Self { bar }
    }

    /// A reporter that never draws
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self { bar }
    }

    pub fn new_or_hidden(message: &str, total: u64, visible: bool) -> Self {
        if visible {
            Self::new_with_total(message, total)
        } else {
            Self::hidden(total)
        }
    }

    /// Advance by one batch and show the training totals
    pub fn advance_train(&self, totals: &RunningTotals) {
        self.bar.set_message(format!(
            "Loss: {:.3} | Reg: {:.5} | Acc: {:.3}% ({:.0}/{})",
            totals.running_loss(),
            totals.running_reg_loss(),
            totals.accuracy(),
            totals.correct,
            totals.total
        ));
        self.bar.inc(1);
    }

    /// Advance by one batch and show the evaluation totals
    pub fn advance_eval(&self, totals: &RunningTotals) {
        self.bar.set_message(format!(
            "Loss: {:.3} | Acc: {:.3}% ({:.0}/{})",
            totals.running_loss(),
            totals.accuracy(),
            totals.correct,
            totals.total
        ));
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}
