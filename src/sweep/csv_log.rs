//! Per-experiment CSV metrics log

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const HEADER: [&str; 6] = [
    "epoch",
    "train loss",
    "reg loss",
    "train acc",
    "test loss",
    "test acc",
];

/// One completed epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub epoch: usize,
    pub train_loss: f64,
    pub reg_loss: f64,
    pub train_acc: f64,
    pub test_loss: f64,
    pub test_acc: f64,
}

/// Append-only CSV file; the header is written only when the file is new so
/// resumed runs keep extending the same log
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(HEADER)?;
            writer.flush()?;
            debug!("Created log {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &LogRow) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(
            OpenOptions::new().create(true).append(true).open(&self.path)?,
        );
        writer.write_record([
            row.epoch.to_string(),
            row.train_loss.to_string(),
            row.reg_loss.to_string(),
            row.train_acc.to_string(),
            row.test_loss.to_string(),
            row.test_acc.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}
