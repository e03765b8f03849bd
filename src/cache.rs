//! Rebuild detection for provisioned environments.
//!
//! Every environment records a SHA256 over the inputs that determine its
//! contents (base reference, packages, identity, account layout). An
//! environment whose recorded hash matches the current inputs is up to date.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Name of the hash file inside an environment directory.
pub const INPUTS_HASH_FILE: &str = ".inputs.hash";

/// SHA256 over labelled input fields.
///
/// Each field is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub fn hash_inputs<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (label, value) in fields {
        for part in [label, value] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Read a cached hash. Missing or unreadable files yield `None`.
pub fn read_cached_hash(hash_file: &Path) -> Option<String> {
    if !hash_file.exists() {
        return None;
    }
    match fs::read_to_string(hash_file) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            log::warn!(
                "failed to read cache hash file {}: {} (will rebuild)",
                hash_file.display(),
                e
            );
            None
        }
    }
}

pub fn write_cached_hash(hash_file: &Path, hash: &str) -> Result<()> {
    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(hash_file, format!("{}\n", hash))?;
    Ok(())
}

/// Does the environment at `env_dir` need to be provisioned again?
///
/// True if it doesn't exist, has no recorded hash, or was built from
/// different inputs. Unlike build artifacts, an environment without a hash
/// is never trusted: it may be the remains of a foreign tool.
pub fn needs_rebuild(inputs_hash: &str, env_dir: &Path) -> bool {
    if !env_dir.join("rootfs").is_dir() {
        return true;
    }
    match read_cached_hash(&env_dir.join(INPUTS_HASH_FILE)) {
        Some(cached) => cached != inputs_hash,
        None => true,
    }
}
