//! Storage roots and per-session directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};

/// Session id from the local time, e.g. `20261017_143502`.
pub fn session_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Directories of one session on one storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirs {
    pub root: PathBuf,
    pub video: PathBuf,
    pub photos: PathBuf,
    pub logs: PathBuf,
}

impl SessionDirs {
    fn under(root: &Path, id: &str) -> Self {
        let base = root.join("Sessions").join(id);
        Self {
            root: root.to_path_buf(),
            video: base.join("video"),
            photos: base.join("photos"),
            logs: base.join("logs"),
        }
    }

    fn create(&self) -> Result<()> {
        for dir in [&self.video, &self.photos, &self.logs] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// The recording roots, each receiving a copy of every session.
#[derive(Debug, Clone)]
pub struct StorageTargets {
    roots: Vec<PathBuf>,
}

impl StorageTargets {
    /// Create every root.  Roots that cannot be created are skipped; it is
    /// an error only if none is usable.
    pub fn init(roots: &[PathBuf]) -> Result<Self> {
        let mut usable = Vec::with_capacity(roots.len());
        for root in roots {
            match std::fs::create_dir_all(root) {
                Ok(()) => usable.push(root.clone()),
                Err(e) => warn!("Storage root {} unusable: {e}", root.display()),
            }
        }
        if usable.is_empty() {
            anyhow::bail!("No usable storage root");
        }
        info!("Storage roots: {}", usable.len());
        Ok(Self { roots: usable })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Create `<root>/Sessions/<id>/{video,photos,logs}` on every root.
    pub fn session_dirs(&self, id: &str) -> Result<Vec<SessionDirs>> {
        self.roots
            .iter()
            .map(|root| {
                let dirs = SessionDirs::under(root, id);
                dirs.create()?;
                Ok(dirs)
            })
            .collect()
    }
}
