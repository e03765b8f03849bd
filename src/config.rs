//! Configuration management for envforge.
//!
//! Reads configuration from a `.env` file in the project directory and from
//! environment variables. Environment variables take precedence over the
//! `.env` file; command-line flags take precedence over both.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ProvisionError;
use crate::identity::{IdentityPair, DEFAULT_GID, DEFAULT_UID};
use crate::image::BaseImage;
use crate::packages::{PackageSet, DEFAULT_PACKAGES};
use crate::profile::{
    Profile, UserSpec, DEFAULT_BASE_IMAGE, DEFAULT_HARDWARE_GROUP, DEFAULT_SHELL,
    DEFAULT_USERNAME,
};

/// Names of every recognised key.
pub const KEYS: &[&str] = &[
    "ENVFORGE_BASE_IMAGE",
    "ENVFORGE_UID",
    "ENVFORGE_GID",
    "ENVFORGE_USERNAME",
    "ENVFORGE_SHELL",
    "ENVFORGE_PACKAGES",
    "ENVFORGE_HARDWARE_GROUP",
    "ENVFORGE_CACHE_DIR",
    "ENVFORGE_OUTPUT_DIR",
    "ENVFORGE_ENGINE",
];

/// envforge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Base image reference (must be pinned)
    pub base_image: String,
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    pub shell: String,
    /// Package entries, `name` or `name=version`
    pub packages: Vec<String>,
    /// Group granting USB device access
    pub hardware_group: String,
    /// Shared cache for exported images and packages
    pub cache_dir: PathBuf,
    /// Where environments are written
    pub output_dir: PathBuf,
    /// Container engine; auto-detected when unset
    pub engine: Option<String>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_image: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub username: Option<String>,
    /// Replaces the configured package list when non-empty
    pub packages: Vec<String>,
    pub output_dir: Option<PathBuf>,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("envforge")
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn parse_id(key: &str, value: &str) -> Result<u32, ProvisionError> {
    value.trim().parse().map_err(|_| {
        ProvisionError::config(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Built-in defaults, with paths relative to `base_dir`.
    pub fn defaults(base_dir: &Path) -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
            username: DEFAULT_USERNAME.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            hardware_group: DEFAULT_HARDWARE_GROUP.to_string(),
            cache_dir: default_cache_dir(),
            output_dir: base_dir.join("output"),
            engine: None,
        }
    }

    /// Load configuration from `.env` and the environment.
    pub fn load(base_dir: &Path) -> Result<Self, ProvisionError> {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            let iter = dotenvy::from_path_iter(&env_path).map_err(|e| {
                ProvisionError::config(format!("cannot read {}: {}", env_path.display(), e))
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| {
                    ProvisionError::config(format!("malformed {}: {}", env_path.display(), e))
                })?;
                vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        Self::from_vars(base_dir, &vars)
    }

    /// Build from already collected key/value pairs.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Result<Self, ProvisionError> {
        let mut config = Self::defaults(base_dir);
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(v) = get("ENVFORGE_BASE_IMAGE") {
            config.base_image = v.to_string();
        }
        if let Some(v) = get("ENVFORGE_UID") {
            config.uid = parse_id("ENVFORGE_UID", v)?;
        }
        if let Some(v) = get("ENVFORGE_GID") {
            config.gid = parse_id("ENVFORGE_GID", v)?;
        }
        if let Some(v) = get("ENVFORGE_USERNAME") {
            config.username = v.to_string();
        }
        if let Some(v) = get("ENVFORGE_SHELL") {
            config.shell = v.to_string();
        }
        if let Some(v) = get("ENVFORGE_PACKAGES") {
            config.packages = split_list(v);
        }
        if let Some(v) = get("ENVFORGE_HARDWARE_GROUP") {
            config.hardware_group = v.to_string();
        }
        if let Some(v) = get("ENVFORGE_CACHE_DIR") {
            config.cache_dir = resolve_path(base_dir, v);
        }
        if let Some(v) = get("ENVFORGE_OUTPUT_DIR") {
            config.output_dir = resolve_path(base_dir, v);
        }
        if let Some(v) = get("ENVFORGE_ENGINE") {
            config.engine = Some(v.to_string());
        }

        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(base) = &overrides.base_image {
            self.base_image = base.clone();
        }
        if let Some(uid) = overrides.uid {
            self.uid = uid;
        }
        if let Some(gid) = overrides.gid {
            self.gid = gid;
        }
        if let Some(name) = &overrides.username {
            self.username = name.clone();
        }
        if !overrides.packages.is_empty() {
            self.packages = overrides
                .packages
                .iter()
                .flat_map(|p| split_list(p))
                .collect();
        }
        if let Some(dir) = &overrides.output_dir {
            self.output_dir = dir.clone();
        }
    }

    /// The provisioning profile described by this configuration. Parses
    /// but does not validate; see [`Profile::validate`].
    pub fn profile(&self) -> Result<Profile, ProvisionError> {
        let base = BaseImage::parse(&self.base_image)?;
        Ok(Profile {
            base,
            packages: PackageSet::from_entries(self.packages.iter().map(String::as_str))?,
            identity: IdentityPair::new(self.uid, self.gid),
            user: UserSpec::new(&self.username, &self.shell),
            hardware_group: self.hardware_group.clone(),
        })
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  ENVFORGE_BASE_IMAGE: {}", self.base_image);
        println!("  ENVFORGE_UID: {}", self.uid);
        println!("  ENVFORGE_GID: {}", self.gid);
        println!("  ENVFORGE_USERNAME: {}", self.username);
        println!("  ENVFORGE_SHELL: {}", self.shell);
        println!("  ENVFORGE_PACKAGES: {}", self.packages.join(" "));
        println!("  ENVFORGE_HARDWARE_GROUP: {}", self.hardware_group);
        println!("  ENVFORGE_CACHE_DIR: {}", self.cache_dir.display());
        println!("  ENVFORGE_OUTPUT_DIR: {}", self.output_dir.display());
        println!(
            "  ENVFORGE_ENGINE: {}",
            self.engine.as_deref().unwrap_or("(auto: podman, docker)")
        );
        match self.profile().and_then(|p| p.validate().map(|_| p)) {
            Ok(_) => println!("  Profile: VALID"),
            Err(e) => println!("  Profile: INVALID ({})", e),
        }
    }
}
