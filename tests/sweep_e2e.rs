//! End-to-end sweeps over tiny generated datasets on the CPU

use std::fs;
use std::path::Path;

use candle_core::Device;
use image::{Rgb, RgbImage};
use mixsweep::config::DeviceType;
use mixsweep::{Error, SweepConfig, SweepController};
use tempfile::TempDir;

const SIZE: u32 = 16;

fn write_class(dir: &Path, colour: [u8; 3], count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let shift = (i * 5) as u8;
        let pixel = Rgb([
            colour[0].saturating_sub(shift),
            colour[1].saturating_sub(shift),
            colour[2].saturating_sub(shift),
        ]);
        RgbImage::from_pixel(SIZE, SIZE, pixel)
            .save(dir.join(format!("sample_{}.png", i)))
            .unwrap();
    }
}

/// Two classes with separable colours for training. Both test classes hold
/// the same grey images, so whatever the model predicts, half of the test
/// set is right and the first evaluation always writes a checkpoint.
fn write_flowers(root: &Path) {
    let dataset = root.join("flowers");
    write_class(&dataset.join("train").join("daisy"), [230, 220, 40], 4);
    write_class(&dataset.join("train").join("rose"), [200, 30, 40], 4);
    write_class(&dataset.join("test").join("daisy"), [128, 128, 128], 2);
    write_class(&dataset.join("test").join("rose"), [128, 128, 128], 2);
}

fn config(root: &Path) -> SweepConfig {
    SweepConfig {
        model: "LeNet".to_string(),
        name: "e2e".to_string(),
        seed: 3,
        lr: 0.01,
        epochs: 1,
        trials: 1,
        iterations: 1,
        batch_size: 4,
        test_batch_size: 2,
        image_size: SIZE,
        workers: 0,
        device: DeviceType::Cpu,
        dataset_dir: root.join("Data"),
        checkpoint_dir: root.join("checkpoint"),
        output_dir: root.join("results"),
        progress: false,
        ..Default::default()
    }
}

fn csv_rows(path: &Path) -> Vec<csv::StringRecord> {
    csv::Reader::from_path(path)
        .unwrap()
        .records()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn baseline_sweep_writes_checkpoint_log_and_summary() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.baseline = true;
    write_flowers(&config.dataset_dir);

    let controller = SweepController::new(config.clone()).unwrap();
    let experiments = controller.run().unwrap();
    assert_eq!(experiments.len(), 1);

    let experiment = &experiments[0];
    assert_eq!(experiment.epochs_run, 1);
    assert!((experiment.best_accuracy - 50.0).abs() < 1e-9);

    let checkpoint = dir
        .path()
        .join("checkpoint")
        .join("ckpt_ite_0_trial_0_dataset_flowers_e2e_3.bin");
    assert!(checkpoint.is_file());
    assert_eq!(fs::read_dir(dir.path().join("checkpoint")).unwrap().count(), 1);

    let log = dir
        .path()
        .join("results")
        .join("results_flowers")
        .join("log__ite_0_trial_0_dataset_flowers__LeNet_e2e_3.csv");
    assert_eq!(experiment.log_path, log);
    let header = fs::read_to_string(&log).unwrap();
    assert!(header.starts_with("epoch,train loss,reg loss,train acc,test loss,test acc\n"));
    let rows = csv_rows(&log);
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "0");
    assert_eq!(&rows[0][2], "0");
    assert_eq!(&rows[0][5], "50");

    let summary = fs::read_to_string(dir.path().join("results").join("flowers_.txt")).unwrap();
    assert!(summary.contains("Test result for iteration 0 experiment: 0 for dataset flowers"));
    assert!(summary.contains("Train result for iteration 0 experiment: 0 for dataset flowers"));
    assert!(summary.contains("daisy"));
    assert!(summary.contains("rose"));
}

#[test]
fn mixup_sweep_logs_zero_regularisation() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.alpha = 1.0;
    config.trials = 2;
    write_flowers(&config.dataset_dir);

    let controller = SweepController::with_device(config, Device::Cpu);
    let experiments = controller.run().unwrap();
    assert_eq!(experiments.len(), 2);
    assert_eq!(experiments[1].key.trial, 1);

    for experiment in &experiments {
        let rows = csv_rows(&experiment.log_path);
        assert_eq!(rows.len(), 1);
        let reg: f64 = rows[0][2].parse().unwrap();
        let train_acc: f64 = rows[0][3].parse().unwrap();
        assert_eq!(reg, 0.0);
        assert!((0.0..=100.0).contains(&train_acc));
    }

    let summary = fs::read_to_string(dir.path().join("results").join("flowers_.txt")).unwrap();
    assert_eq!(summary.matches("Test result for iteration").count(), 2);
}

#[test]
fn resume_continues_after_checkpoint_epoch() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.baseline = true;
    write_flowers(&config.dataset_dir);

    SweepController::new(config.clone()).unwrap().run().unwrap();

    config.resume = true;
    config.epochs = 2;
    let experiments = SweepController::new(config).unwrap().run().unwrap();
    assert_eq!(experiments[0].epochs_run, 1);

    let epochs: Vec<String> = csv_rows(&experiments[0].log_path)
        .iter()
        .map(|r| r[0].to_string())
        .collect();
    assert_eq!(epochs, vec!["0", "1"]);

    let summary = fs::read_to_string(dir.path().join("results").join("flowers_.txt")).unwrap();
    assert_eq!(summary.matches("Train result for iteration").count(), 2);
}

#[test]
fn empty_dataset_root_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    fs::create_dir_all(&config.dataset_dir).unwrap();

    let result = SweepController::new(config).unwrap().run();
    assert!(matches!(result, Err(Error::NoDatasets { .. })));
}
