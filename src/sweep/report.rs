//! Plain-text classification summaries appended to the per-dataset result file

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Precision, recall and F1 of one class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class scores, averages and the confusion matrix of one prediction run
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    /// `confusion[true][predicted]`
    pub confusion: Vec<Vec<usize>>,
    /// Fraction of correct predictions
    pub accuracy: f64,
    pub total: usize,
}

impl ClassificationReport {
    /// Build the report from `(predicted, true)` label pairs
    pub fn from_predictions(class_names: &[String], pairs: &[(u32, u32)]) -> Self {
        let n = class_names.len();
        let mut confusion = vec![vec![0usize; n]; n];
        for &(predicted, actual) in pairs {
            let (p, a) = (predicted as usize, actual as usize);
            if p < n && a < n {
                confusion[a][p] += 1;
            }
        }

        let classes = class_names
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let tp = confusion[c][c];
                let support: usize = confusion[c].iter().sum();
                let predicted: usize = confusion.iter().map(|row| row[c]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassScores {
                    name: name.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let correct = (0..n).map(|c| confusion[c][c]).sum();
        Self {
            classes,
            confusion,
            accuracy: ratio(correct, pairs.len()),
            total: pairs.len(),
        }
    }

    /// Unweighted mean of (precision, recall, f1) over classes
    pub fn macro_average(&self) -> (f64, f64, f64) {
        if self.classes.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let n = self.classes.len() as f64;
        let sum = self.classes.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            (acc.0 + c.precision, acc.1 + c.recall, acc.2 + c.f1)
        });
        (sum.0 / n, sum.1 / n, sum.2 / n)
    }

    /// Support-weighted mean of (precision, recall, f1)
    pub fn weighted_average(&self) -> (f64, f64, f64) {
        let support: usize = self.classes.iter().map(|c| c.support).sum();
        if support == 0 {
            return (0.0, 0.0, 0.0);
        }
        let sum = self.classes.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            let w = c.support as f64;
            (acc.0 + w * c.precision, acc.1 + w * c.recall, acc.2 + w * c.f1)
        });
        let total = support as f64;
        (sum.0 / total, sum.1 / total, sum.2 / total)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.name.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        let (p, r, f1) = self.macro_average();
        writeln!(f, "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}", "macro avg", p, r, f1, self.total)?;
        let (p, r, f1) = self.weighted_average();
        writeln!(f, "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}", "weighted avg", p, r, f1, self.total)?;

        writeln!(f)?;
        writeln!(f, "Confusion matrix (rows: true, columns: predicted)")?;
        for row in &self.confusion {
            let mut line = String::new();
            for count in row {
                write!(line, "{:>6}", count)?;
            }
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Append the test and train summaries of one experiment to `path`
pub fn append_summary(
    path: &Path,
    dataset: &str,
    iteration: usize,
    trial: usize,
    test: &ClassificationReport,
    train: &ClassificationReport,
) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "Test result for iteration {} experiment: {} for dataset {}",
        iteration, trial, dataset
    )?;
    writeln!(file, "{}", test)?;
    writeln!(
        file,
        "Train result for iteration {} experiment: {} for dataset {}",
        iteration, trial, dataset
    )?;
    writeln!(file, "{}", train)?;
    file.flush()?;
    Ok(())
}
