//! Shared package cache.
//!
//! Downloaded packages and index data outlive a single provisioning run so
//! repeated builds on one host don't refetch everything. The cache is keyed
//! by a fixed path per OS family and guarded by an exclusive file lock:
//! concurrent runs queue up behind each other instead of interleaving
//! writes. The cache is only ever added to, never invalidated.

use anyhow::{Context, Result};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::image::OsFamily;

/// Transient package manager files that must never be shared.
fn is_transient(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some("partial") | Some("lock")))
}

/// Root of the shared package cache.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("packages"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the cached files of one family.
    pub fn family_dir(&self, family: OsFamily) -> PathBuf {
        self.root.join(family.as_str())
    }

    pub fn lock_path(&self, family: OsFamily) -> PathBuf {
        self.root.join(format!("{}.lock", family.as_str()))
    }

    /// Take the exclusive lock for a family, waiting for other runs.
    pub fn lock(&self, family: OsFamily) -> Result<CacheLock<'_>> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create package cache {}", self.root.display()))?;

        let path = self.lock_path(family);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open cache lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                println!("  Waiting for package cache lock ({})...", path.display());
                file.lock_exclusive()
                    .with_context(|| format!("Failed to lock {}", path.display()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to lock {}", path.display()));
            }
        }
        log::debug!("acquired package cache lock {}", path.display());

        Ok(CacheLock {
            cache: self,
            family,
            file,
        })
    }

    /// True if another run currently holds the lock for `family`.
    pub fn is_locked(&self, family: OsFamily) -> Result<bool> {
        let path = self.lock_path(family);
        if !path.exists() {
            return Ok(false);
        }
        let file = File::open(&path)
            .with_context(|| format!("Failed to open cache lock {}", path.display()))?;
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(e).with_context(|| format!("Failed to test lock {}", path.display())),
        }
    }

    /// Remove every cached file. Takes each family lock first.
    pub fn clear(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for family in [OsFamily::Debian, OsFamily::Redhat] {
            let _lock = self.lock(family)?;
            let dir = self.family_dir(family);
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to remove {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

/// Exclusive access to one family's cache. Released on drop.
pub struct CacheLock<'a> {
    cache: &'a PackageCache,
    family: OsFamily,
    file: File,
}

impl CacheLock<'_> {
    pub fn family(&self) -> OsFamily {
        self.family
    }

    /// Copy cached files into the environment's package manager dirs.
    pub fn seed(&self, env_root: &Path, dirs: &[&str]) -> Result<usize> {
        let family_dir = self.cache.family_dir(self.family);
        let mut copied = 0;
        for dir in dirs {
            copied += sync_files(&family_dir.join(dir), &env_root.join(dir))?;
        }
        log::info!("seeded {} cached files into {}", copied, env_root.display());
        Ok(copied)
    }

    /// Copy new or changed files from the environment back into the cache.
    pub fn harvest(&self, env_root: &Path, dirs: &[&str]) -> Result<usize> {
        let family_dir = self.cache.family_dir(self.family);
        let mut copied = 0;
        for dir in dirs {
            copied += sync_files(&env_root.join(dir), &family_dir.join(dir))?;
        }
        log::info!("harvested {} files into {}", copied, family_dir.display());
        Ok(copied)
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to release package cache lock: {}", e);
        }
    }
}

/// Copy regular files from `src` to `dst` where missing, differing in size,
/// or newer in `src`. Returns the number of files copied.
fn sync_files(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(src)?;
        if is_transient(relative) {
            continue;
        }
        let target = dst.join(relative);
        let src_meta = entry.metadata()?;
        if let Ok(meta) = fs::metadata(&target) {
            let newer = match (src_meta.modified(), meta.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
                _ => true,
            };
            if meta.len() == src_meta.len() && !newer {
                continue;
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target).with_context(|| {
            format!("Failed to copy {} to {}", entry.path().display(), target.display())
        })?;
        // Carry the mtime so the copy does not look newer than its source
        if let Ok(time) = src_meta.modified() {
            if let Err(e) = File::options()
                .write(true)
                .open(&target)
                .and_then(|f| f.set_modified(time))
            {
                log::debug!("cannot set mtime on {}: {}", target.display(), e);
            }
        }
        copied += 1;
    }
    Ok(copied)
}

/// Empty the package manager dirs inside the environment, keeping the
/// directories themselves.
pub fn purge(env_root: &Path, dirs: &[&str]) -> Result<()> {
    for dir in dirs {
        let path = env_root.join(dir);
        if !path.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let p = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&p)?;
            } else {
                fs::remove_file(&p)?;
            }
        }
    }
    Ok(())
}
