use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::io::{self, IoError};

/// On-disk layout of one training run
#[derive(Debug, Clone)]
pub struct OutputDirs {
    root: PathBuf,
}

impl OutputDirs {
    /// Creates `models/`, `optimizers/` and `logs/` under `root`
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, IoError> {
        let dirs = Self { root: root.into() };
        for dir in [dirs.models(), dirs.optimizers(), dirs.logs()] {
            fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn optimizers(&self) -> PathBuf {
        self.root.join("optimizers")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn mean_loss_log(&self) -> PathBuf {
        self.logs().join("mean_loss.txt")
    }

    pub fn configuration_log(&self) -> PathBuf {
        self.logs().join("configurations.txt")
    }

    /// Name used to tag notifications from this run
    pub fn label(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    pub fn write_configuration(&self, lines: &[String]) -> Result<(), IoError> {
        let mut text = lines.join("\n");
        text.push('\n');
        io::write_string(self.configuration_log(), text)
    }

    pub fn append_mean_loss(&self, mean_loss: f32) -> Result<(), IoError> {
        io::append_line(self.mean_loss_log(), mean_loss.to_string())
    }
}
