//! The provisioning result: a root filesystem plus its runtime config and
//! manifest.
//!
//! ```text
//! output/<name>/
//!   rootfs/          environment root
//!   config.json      default execution identity
//!   manifest.json    what went in (deterministic, no timestamps)
//!   .inputs.hash     rebuild detection
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::identity::IdentityPair;
use crate::image::OsFamily;
use crate::profile::ProvisionedUser;

pub const ROOTFS_DIR: &str = "rootfs";
pub const CONFIG_FILE: &str = "config.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Identity and environment anything run inside the environment gets by
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub working_dir: String,
    pub shell: String,
    pub env: BTreeMap<String, String>,
}

impl RuntimeConfig {
    pub fn for_user(user: &str, uid: u32, gid: u32, home: &str, shell: &str) -> Self {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), home.to_string());
        env.insert("USER".to_string(), user.to_string());
        env.insert("LOGNAME".to_string(), user.to_string());
        env.insert("SHELL".to_string(), shell.to_string());
        env.insert(
            "PATH".to_string(),
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        );
        Self {
            user: user.to_string(),
            uid,
            gid,
            working_dir: home.to_string(),
            shell: shell.to_string(),
            env,
        }
    }

    pub fn is_administrative(&self) -> bool {
        self.uid == crate::identity::ROOT_ID || self.user == "root"
    }
}

/// Record of the inputs and resulting package set of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub base_image: String,
    pub family: OsFamily,
    pub identity: IdentityPair,
    pub user: ProvisionedUser,
    pub hardware_group: String,
    /// Packages as requested, in request order.
    pub requested: Vec<String>,
    /// Every installed package with its version.
    pub installed: BTreeMap<String, String>,
    /// Requested names satisfied by a differently named package.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolved: BTreeMap<String, String>,
    pub inputs_hash: String,
}

impl Manifest {
    /// Requested packages absent from the installed set.
    pub fn missing_packages(&self) -> Vec<&str> {
        self.requested
            .iter()
            .map(|entry| entry.split('=').next().unwrap_or(entry))
            .filter(|name| {
                let actual = self.resolved.get(*name).map_or(*name, String::as_str);
                !self.installed.contains_key(actual)
            })
            .collect()
    }
}

/// A provisioned environment on disk.
#[derive(Debug, Clone)]
pub struct ExecutableEnvironment {
    pub dir: PathBuf,
    pub config: RuntimeConfig,
    pub manifest: Manifest,
}

impl ExecutableEnvironment {
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let manifest_path = dir.join(MANIFEST_FILE);
        let config: RuntimeConfig = serde_json::from_str(
            &fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?,
        )
        .with_context(|| format!("Invalid runtime config {}", config_path.display()))?;
        let manifest: Manifest = serde_json::from_str(
            &fs::read_to_string(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?,
        )
        .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            manifest,
        })
    }

    pub fn rootfs(&self) -> PathBuf {
        self.dir.join(ROOTFS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::sudoers::PrivilegeRule;

    #[test]
    fn test_runtime_config_env() {
        let cfg = RuntimeConfig::for_user("dev", 1000, 1000, "/home/dev", "/bin/bash");
        assert_eq!(cfg.env["HOME"], "/home/dev");
        assert_eq!(cfg.working_dir, "/home/dev");
        assert!(!cfg.is_administrative());
        assert!(RuntimeConfig::for_user("root", 0, 0, "/root", "/bin/sh").is_administrative());
    }

    #[test]
    fn test_missing_packages_ignores_versions() {
        let manifest = Manifest {
            base_image: "debian:12.5-slim".into(),
            family: OsFamily::Debian,
            identity: IdentityPair::default(),
            user: ProvisionedUser {
                name: "dev".into(),
                home: "/home/dev".into(),
                shell: "/bin/bash".into(),
                uid: 1000,
                gid: 1000,
                groups: vec!["dev".into(), "plugdev".into()],
                privilege: PrivilegeRule::passwordless("dev"),
            },
            hardware_group: "plugdev".into(),
            requested: vec!["sudo=1.9".into(), "libusb-1.0.0".into()],
            installed: BTreeMap::from([("sudo".to_string(), "1.9".to_string())]),
            resolved: BTreeMap::new(),
            inputs_hash: String::new(),
        };
        assert_eq!(manifest.missing_packages(), vec!["libusb-1.0.0"]);

        let mut manifest = manifest;
        manifest
            .installed
            .insert("libusb-1.0-0".to_string(), "2:1.0.26-1".to_string());
        manifest
            .resolved
            .insert("libusb-1.0.0".to_string(), "libusb-1.0-0".to_string());
        assert!(manifest.missing_packages().is_empty());
    }
}
