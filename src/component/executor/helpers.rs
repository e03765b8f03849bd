//! Test helpers for executor module tests.

#![cfg(test)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::build::context::BuildContext;
use crate::error::ProvisionError;
use crate::image::{BaseImage, OsFamily};
use crate::packages::apt::{parse_dpkg_status, DPKG_STATUS};
use crate::packages::{PackageManager, PackageSet};

/// Package manager that records calls and fakes a dpkg database.
pub struct RecordingPackageManager {
    calls: Mutex<Vec<String>>,
    fail_install: bool,
    aliases: BTreeMap<String, String>,
}

impl RecordingPackageManager {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_install: false,
            aliases: BTreeMap::new(),
        }
    }

    /// Install `actual` whenever `requested` is asked for.
    pub fn with_alias(mut self, requested: &str, actual: &str) -> Self {
        self.aliases.insert(requested.to_string(), actual.to_string());
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_install: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PackageManager for RecordingPackageManager {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn cache_dirs(&self) -> &'static [&'static str] {
        &["var/cache/apt/archives", "var/lib/apt/lists"]
    }

    fn refresh_index(&self, root: &Path) -> Result<(), ProvisionError> {
        self.record("refresh".to_string());
        let lists = root.join("var/lib/apt/lists");
        fs::create_dir_all(&lists).unwrap();
        fs::write(lists.join("deb.debian.org_debian_dists_bookworm_InRelease"), "index").unwrap();
        Ok(())
    }

    fn install(&self, root: &Path, packages: &PackageSet) -> Result<(), ProvisionError> {
        self.record(format!("install {}", packages));
        if self.fail_install {
            return Err(ProvisionError::install("E: Unable to locate package"));
        }
        let archives = root.join("var/cache/apt/archives");
        fs::create_dir_all(&archives).unwrap();
        let mut status = fs::read_to_string(root.join(DPKG_STATUS)).unwrap_or_default();
        for name in packages.names() {
            let name = self.aliases.get(name).map_or(name, String::as_str);
            fs::write(archives.join(format!("{}.deb", name)), name).unwrap();
            status.push_str(&format!(
                "Package: {}\nStatus: install ok installed\nVersion: 1.0-test\n\n",
                name
            ));
            if name == "sudo" {
                fs::create_dir_all(root.join("usr/bin")).unwrap();
                fs::write(root.join("usr/bin/sudo"), "").unwrap();
                fs::create_dir_all(root.join("etc/sudoers.d")).unwrap();
            }
        }
        fs::write(root.join(DPKG_STATUS), status).unwrap();
        Ok(())
    }

    fn installed(&self, root: &Path) -> Result<BTreeMap<String, String>, ProvisionError> {
        let content = fs::read_to_string(root.join(DPKG_STATUS)).unwrap_or_default();
        Ok(parse_dpkg_status(&content))
    }
}

/// Temporary base rootfs, environment and cache directories.
pub struct TestEnv {
    /// Kept alive for the lifetime of the TestEnv
    pub _temp_dir: TempDir,
    /// Mock base image rootfs
    pub base: PathBuf,
    pub env_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub pm: Arc<RecordingPackageManager>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_pm(RecordingPackageManager::new())
    }

    pub fn with_pm(pm: RecordingPackageManager) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().join("base");
        let env_dir = temp_dir.path().join("env");
        let cache_dir = temp_dir.path().join("cache");
        create_mock_base(&base);
        fs::create_dir_all(&env_dir).unwrap();

        Self {
            _temp_dir: temp_dir,
            base,
            env_dir,
            cache_dir,
            pm: Arc::new(pm),
        }
    }

    pub fn build_context(&self) -> BuildContext {
        BuildContext::for_testing(
            &self.env_dir,
            BaseImage::parse("debian:12.5-slim").unwrap(),
            &self.base,
            &self.cache_dir,
            self.pm.clone(),
        )
    }
}

/// Minimal Debian-like base: account databases, os-release, bash, skel.
pub fn create_mock_base(root: &Path) {
    for dir in ["etc/skel", "bin", "usr/bin", "var/lib/dpkg", "var/cache/apt/archives"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    fs::write(
        root.join("etc/passwd"),
        "root:x:0:0:root:/root:/bin/bash\n\
         daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
         nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n",
    )
    .unwrap();
    fs::write(
        root.join("etc/group"),
        "root:x:0:\ndaemon:x:1:\nplugdev:x:46:\nnogroup:x:65534:\n",
    )
    .unwrap();
    fs::write(root.join("etc/shadow"), "root:*:19000:0:99999:7:::\n").unwrap();
    fs::write(root.join("etc/gshadow"), "root:*::\nplugdev:*::\n").unwrap();
    fs::write(
        root.join("etc/os-release"),
        "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\nVERSION_ID=\"12\"\n",
    )
    .unwrap();
    fs::write(root.join("etc/skel/.bashrc"), "# ~/.bashrc\n").unwrap();
    fs::write(root.join("bin/bash"), "").unwrap();
    fs::write(
        root.join(DPKG_STATUS),
        "Package: base-files\nStatus: install ok installed\nVersion: 12.4+deb12u5\n\n",
    )
    .unwrap();
}
