//! Removing environments and cached data.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::packages::PackageCache;

/// Remove every provisioned environment, including stale staging dirs.
pub fn clean_outputs(output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        println!("Removing {}...", output_dir.display());
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("Failed to remove {}", output_dir.display()))?;
    }
    println!("Clean complete (cache preserved).");
    Ok(())
}

/// Remove exported base images and cached packages. Waits for any run
/// holding a package cache lock.
pub fn clean_cache(cache_dir: &Path) -> Result<()> {
    println!("Clearing cache ({})...", cache_dir.display());
    PackageCache::new(cache_dir).clear()?;

    let images = cache_dir.join("images");
    if images.exists() {
        fs::remove_dir_all(&images)
            .with_context(|| format!("Failed to remove {}", images.display()))?;
    }
    println!("Cache cleared.");
    Ok(())
}

pub fn clean_all(output_dir: &Path, cache_dir: &Path) -> Result<()> {
    clean_outputs(output_dir)?;
    clean_cache(cache_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::OsFamily;
    use tempfile::TempDir;

    #[test]
    fn test_clean_cache_keeps_lock_files() {
        let dir = TempDir::new().unwrap();
        let cache = PackageCache::new(dir.path());
        let cached = cache.family_dir(OsFamily::Debian).join("var/cache/apt/archives/sudo.deb");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, "deb").unwrap();
        fs::create_dir_all(dir.path().join("images")).unwrap();
        fs::write(dir.path().join("images/debian_12.5-slim.tar"), "tar").unwrap();

        clean_cache(dir.path()).unwrap();

        assert!(!cached.exists());
        assert!(!dir.path().join("images").exists());
        assert!(cache.lock_path(OsFamily::Debian).exists());
    }

    #[test]
    fn test_clean_outputs_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        clean_outputs(&dir.path().join("output")).unwrap();
    }
}
