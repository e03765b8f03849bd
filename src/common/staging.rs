//! Staging directories for all-or-nothing builds.
//!
//! An environment is assembled next to its final location and renamed into
//! place only once every step succeeded. Dropping an uncommitted
//! [`StagingDir`] deletes it, so an aborted run never leaves a half-built
//! environment behind.
//!
//! Runs targeting the same environment name serialize on a [`BuildLock`];
//! the staging path is shared between them.

use anyhow::{Context, Result};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Exclusive claim on one environment name under an output directory.
/// Released on drop.
pub struct BuildLock {
    path: PathBuf,
    file: File,
}

impl BuildLock {
    /// Lock `<parent>/.<name>.lock`, waiting for a run that holds it.
    pub fn acquire(parent: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let path = parent.join(format!(".{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open build lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                println!("  Waiting for another run on {}...", name);
                file.lock_exclusive()
                    .with_context(|| format!("Failed to lock {}", path.display()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to lock {}", path.display()));
            }
        }
        log::debug!("acquired build lock {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}

pub struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    /// Create a fresh staging directory `.<name>.staging` under `parent`,
    /// removing leftovers of an earlier aborted run.
    pub fn create(parent: &Path, name: &str) -> Result<Self> {
        let path = parent.join(format!(".{}.staging", name));
        if path.exists() {
            log::warn!("removing stale staging directory {}", path.display());
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged tree to `dest`, replacing whatever was there.
    ///
    /// The previous tree is moved aside first and only deleted once the new
    /// one is in place; if the rename fails it is put back.
    pub fn commit(mut self, dest: &Path) -> Result<PathBuf> {
        let previous = self.path.with_extension("previous");
        if previous.exists() {
            fs::remove_dir_all(&previous)
                .with_context(|| format!("Failed to remove {}", previous.display()))?;
        }
        let had_previous = dest.exists();
        if had_previous {
            fs::rename(dest, &previous).with_context(|| {
                format!("Failed to move previous {} aside", dest.display())
            })?;
        }

        if let Err(e) = fs::rename(&self.path, dest) {
            if had_previous {
                if let Err(restore) = fs::rename(&previous, dest) {
                    log::warn!(
                        "failed to restore {} from {}: {}",
                        dest.display(),
                        previous.display(),
                        restore
                    );
                }
            }
            return Err(e).with_context(|| {
                format!("Failed to move {} to {}", self.path.display(), dest.display())
            });
        }
        self.committed = true;

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                log::warn!("failed to remove {}: {}", previous.display(), e);
            }
        }
        Ok(dest.to_path_buf())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                log::warn!("failed to discard {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_uncommitted_is_discarded() {
        let dir = TempDir::new().unwrap();
        let staged_path = {
            let staging = StagingDir::create(dir.path(), "env").unwrap();
            fs::write(staging.path().join("partial"), "x").unwrap();
            staging.path().to_path_buf()
        };
        assert!(!staged_path.exists());
    }

    #[test]
    fn test_commit_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("env");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old"), "x").unwrap();

        let staging = StagingDir::create(dir.path(), "env").unwrap();
        fs::write(staging.path().join("new"), "y").unwrap();
        staging.commit(&dest).unwrap();

        assert!(dest.join("new").exists());
        assert!(!dest.join("old").exists());
        assert!(!dir.path().join(".env.staging").exists());
        assert!(!dir.path().join(".env.previous").exists());
    }

    #[test]
    fn test_failed_commit_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("env");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old"), "x").unwrap();

        let staging = StagingDir::create(dir.path(), "env").unwrap();
        // Staged tree vanished: the rename has nothing to move
        fs::remove_dir_all(staging.path()).unwrap();
        assert!(staging.commit(&dest).is_err());

        assert!(dest.join("old").exists());
    }

    #[test]
    fn test_build_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = BuildLock::acquire(dir.path(), "env").unwrap();
        assert!(lock.path().exists());

        let other = File::open(lock.path()).unwrap();
        assert!(other.try_lock_exclusive().is_err());
        drop(lock);
        other.try_lock_exclusive().unwrap();
        FileExt::unlock(&other).unwrap();
    }
}
