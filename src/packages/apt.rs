//! Debian family backend: apt-get under chroot, dpkg status for queries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{PackageManager, PackageSet};
use crate::chroot::ChrootSession;
use crate::error::ProvisionError;
use crate::image::OsFamily;

/// Debian images ship this hook, which deletes downloaded .debs after every
/// install and would defeat the shared cache.
pub const DOCKER_CLEAN_HOOK: &str = "etc/apt/apt.conf.d/docker-clean";

pub const DPKG_STATUS: &str = "var/lib/dpkg/status";

const APT_CACHE_DIRS: &[&str] = &["var/cache/apt/archives", "var/lib/apt/lists"];

/// Options that keep installs unattended and minimal.
pub const APT_INSTALL_OPTS: &[&str] = &[
    "-y",
    "--no-install-recommends",
    "-o",
    "APT::Install-Suggests=0",
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

pub struct Apt;

impl PackageManager for Apt {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn cache_dirs(&self) -> &'static [&'static str] {
        APT_CACHE_DIRS
    }

    fn refresh_index(&self, root: &Path) -> Result<(), ProvisionError> {
        let hook = root.join(DOCKER_CLEAN_HOOK);
        if hook.exists() {
            fs::remove_file(&hook).map_err(|e| {
                ProvisionError::install(format!("cannot remove {}: {}", hook.display(), e))
            })?;
        }

        let session = ChrootSession::enter(root)
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        session
            .cmd("apt-get")
            .arg("update")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .error_msg("apt-get update failed")
            .run()
            .map_err(|e| ProvisionError::fetch(format!("{:#}", e)))?;
        Ok(())
    }

    fn install(&self, root: &Path, packages: &PackageSet) -> Result<(), ProvisionError> {
        if packages.is_empty() {
            return Ok(());
        }
        let session = ChrootSession::enter(root)
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        let result = session
            .cmd("apt-get")
            .arg("install")
            .args(APT_INSTALL_OPTS)
            .args(packages.install_args(OsFamily::Debian))
            .env("DEBIAN_FRONTEND", "noninteractive")
            .error_msg(format!("apt-get install {} failed", packages))
            .run()
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        log::debug!("apt-get install output:\n{}", result.stdout);
        Ok(())
    }

    fn installed(&self, root: &Path) -> Result<BTreeMap<String, String>, ProvisionError> {
        let path = root.join(DPKG_STATUS);
        let content = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::install(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(parse_dpkg_status(&content))
    }
}

/// Parse a dpkg status database into `package -> version`, keeping only
/// packages whose state is fully installed.
pub fn parse_dpkg_status(content: &str) -> BTreeMap<String, String> {
    let mut installed = BTreeMap::new();

    for stanza in content.split("\n\n") {
        let mut package = None;
        let mut version = None;
        let mut is_installed = false;

        for line in stanza.lines() {
            // Continuation lines of multi-line fields start with whitespace
            if line.starts_with(' ') || line.starts_with('\t') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "Package" => package = Some(value),
                "Version" => version = Some(value),
                "Status" => is_installed = value.ends_with(" installed"),
                _ => {}
            }
        }

        if let (Some(package), true) = (package, is_installed) {
            installed.insert(package.to_string(), version.unwrap_or("").to_string());
        }
    }

    installed
}
