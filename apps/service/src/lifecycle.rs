//! Pid file and the touch-to-reload trigger file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::error::LifecycleError;

/// Pid file written at start-up and removed on a clean stop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, LifecycleError> {
        let path = path.into();
        fs::write(&path, format!("{}\n", std::process::id()))
            .map_err(|source| LifecycleError::PidWrite { path: path.clone(), source })?;
        info!(target: "hostwatch::lifecycle", "Wrote pid file {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. One that is already gone counts as removed.
    pub fn remove(&self) -> Result<(), LifecycleError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(target: "hostwatch::lifecycle", "Removed pid file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LifecycleError::PidRemove { path: self.path.clone(), source }),
        }
    }
}

/// Edge-triggered watch on a file's modification time
#[derive(Debug)]
pub struct ReloadTrigger {
    path: PathBuf,
    /// `None` until the first check has taken a baseline
    last_seen: Option<Option<SystemTime>>,
}

impl ReloadTrigger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), last_seen: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()
    }

    /// True once for every new modification time. The first call only
    /// records the baseline. A missing file never triggers.
    pub fn check(&mut self) -> bool {
        let current = self.modified();
        let Some(previous) = self.last_seen.replace(current) else {
            return false;
        };
        current.is_some() && current != previous
    }
}
