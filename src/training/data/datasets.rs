//! Folder-per-class image dataset

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// A single image on disk and its class index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: u32,
}

/// Dataset laid out as `root/<class name>/<image file>`
///
/// Classes are the sorted subdirectory names and labels are their positions
/// in that order. Samples are sorted by path so that the index of a sample is
/// stable across runs.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scan `root` for class directories and their image files
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::dataset(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let classes = sorted_subdirectories(&root)?;
        if classes.is_empty() {
            return Err(Error::dataset(format!(
                "no class directories in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let mut files: Vec<PathBuf> = fs::read_dir(root.join(class))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            files.sort();
            debug!("Class {} ({}): {} images", label, class, files.len());
            samples.extend(files.into_iter().map(|path| ImageSample {
                path,
                label: label as u32,
            }));
        }

        if samples.is_empty() {
            return Err(Error::dataset(format!("no images under {}", root.display())));
        }

        info!(
            "Loaded image folder {} with {} classes and {} images",
            root.display(),
            classes.len(),
            samples.len()
        );

        Ok(Self {
            root,
            classes,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Class names in label order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get a sample by index
    pub fn get(&self, index: usize) -> Result<&ImageSample> {
        self.samples.get(index).ok_or_else(|| {
            Error::dataset(format!(
                "sample index {} out of range for {} samples",
                index,
                self.samples.len()
            ))
        })
    }
}

/// Sorted names of the directories directly under `dir`
pub fn sorted_subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(|s| s.to_string()))
        .collect();
    names.sort();
    Ok(names)
}

fn has_image_extension(path: &Path) -> bool {
    const EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff"];
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
