//! Red Hat family backend: dnf under chroot, rpm database for queries.

use std::collections::BTreeMap;
use std::path::Path;

use super::{PackageManager, PackageSet};
use crate::chroot::ChrootSession;
use crate::error::ProvisionError;
use crate::image::OsFamily;

const DNF_CACHE_DIRS: &[&str] = &["var/cache/dnf"];

pub const DNF_INSTALL_OPTS: &[&str] = &[
    "-y",
    "--setopt=install_weak_deps=False",
    "--setopt=keepcache=True",
    "--setopt=tsflags=nodocs",
];

const RPM_QUERY_FORMAT: &str = "%{NAME} %{VERSION}-%{RELEASE}\\n";

pub struct Dnf;

impl PackageManager for Dnf {
    fn family(&self) -> OsFamily {
        OsFamily::Redhat
    }

    fn cache_dirs(&self) -> &'static [&'static str] {
        DNF_CACHE_DIRS
    }

    fn refresh_index(&self, root: &Path) -> Result<(), ProvisionError> {
        let session = ChrootSession::enter(root)
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        session
            .cmd("dnf")
            .args(["-y", "--setopt=keepcache=True", "makecache"])
            .error_msg("dnf makecache failed")
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
            .cmd("dnf")
            .args(DNF_INSTALL_OPTS)
            .arg("install")
            .args(packages.install_args(OsFamily::Redhat))
            .error_msg(format!("dnf install {} failed", packages))
            .run()
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        log::debug!("dnf install output:\n{}", result.stdout);
        Ok(())
    }

    fn installed(&self, root: &Path) -> Result<BTreeMap<String, String>, ProvisionError> {
        let result = crate::process::Cmd::new("chroot")
            .arg_path(root)
            .args(["rpm", "-qa", "--qf", RPM_QUERY_FORMAT])
            .error_msg("rpm query failed")
            .run()
            .map_err(|e| ProvisionError::install(format!("{:#}", e)))?;
        Ok(parse_rpm_query(&result.stdout))
    }
}

/// Parse `name version-release` lines from `rpm -qa --qf`.
pub fn parse_rpm_query(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(' '))
        .map(|(name, version)| (name.to_string(), version.trim().to_string()))
        .collect()
}
