//! File helpers: writes with parent creation, and faithful tree copies.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{lchown, symlink, MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories
/// as needed.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn write_json<P: AsRef<Path>, T: serde::Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    write_file_with_dirs(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Copy a directory tree, preserving symlinks (not following them) and
/// permission bits. Ownership is kept when running as root. Returns the
/// number of entries copied.
///
/// Directory modes are applied after their contents are copied, so
/// read-only directories in the source do not block the copy.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let keep_owner = crate::process::is_root();
    let mut dirs = Vec::new();
    let mut count = 0;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        let meta = entry.metadata()?;

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dirs.push((target, meta));
            count += 1;
            continue;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }
            symlink(&link, &target).with_context(|| {
                format!("Failed to create symlink {}", target.display())
            })?;
            if keep_owner {
                lchown(&target, Some(meta.uid()), Some(meta.gid()))?;
            }
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            if keep_owner {
                lchown(&target, Some(meta.uid()), Some(meta.gid()))?;
            }
            // chown clears setuid/setgid, so the mode goes on last
            fs::set_permissions(&target, fs::Permissions::from_mode(meta.mode()))?;
        } else {
            log::debug!("skipping special file {}", entry.path().display());
            continue;
        }
        count += 1;
    }

    // Deepest first
    for (target, meta) in dirs.iter().rev() {
        if keep_owner {
            lchown(target, Some(meta.uid()), Some(meta.gid()))?;
        }
        fs::set_permissions(target, fs::Permissions::from_mode(meta.mode()))
            .with_context(|| format!("Failed to set mode on {}", target.display()))?;
    }
    Ok(count)
}
