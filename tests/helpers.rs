//! Shared test utilities for envforge tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use envforge::component::ProvisionOptions;
use envforge::error::ProvisionError;
use envforge::image::{BaseImage, OsFamily};
use envforge::packages::apt::{parse_dpkg_status, DPKG_STATUS};
use envforge::packages::{PackageManager, PackageSet};
use envforge::profile::Profile;

/// Package manager double: records calls and maintains a dpkg database in
/// the environment root instead of running apt.
pub struct FakeApt {
    calls: Mutex<Vec<String>>,
    aliases: BTreeMap<String, String>,
    delay: Duration,
}

impl FakeApt {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            aliases: BTreeMap::new(),
            delay: Duration::ZERO,
        }
    }

    /// Install `actual` when `requested` is asked for, the way apt expands
    /// a name containing regex characters.
    pub fn with_alias(mut self, requested: &str, actual: &str) -> Self {
        self.aliases.insert(requested.to_string(), actual.to_string());
        self
    }

    /// Sleep inside install so concurrent runs overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PackageManager for FakeApt {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn cache_dirs(&self) -> &'static [&'static str] {
        &["var/cache/apt/archives", "var/lib/apt/lists"]
    }

    fn refresh_index(&self, root: &Path) -> Result<(), ProvisionError> {
        self.calls.lock().unwrap().push("refresh".to_string());
        let lists = root.join("var/lib/apt/lists");
        fs::create_dir_all(&lists).unwrap();
        fs::write(lists.join("bookworm_InRelease"), "index").unwrap();
        Ok(())
    }

    fn install(&self, root: &Path, packages: &PackageSet) -> Result<(), ProvisionError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("install {}", packages));
        thread::sleep(self.delay);
        let archives = root.join("var/cache/apt/archives");
        fs::create_dir_all(&archives).unwrap();
        let mut status = fs::read_to_string(root.join(DPKG_STATUS)).unwrap_or_default();
        for spec in packages.iter() {
            let name = self.aliases.get(&spec.name).unwrap_or(&spec.name);
            let version = spec.version.clone().unwrap_or_else(|| "1.0-1".to_string());
            fs::write(archives.join(format!("{}_{}.deb", name, version)), "deb").unwrap();
            status.push_str(&format!(
                "Package: {}\nStatus: install ok installed\nVersion: {}\n\n",
                name, version
            ));
            if name == "sudo" {
                fs::create_dir_all(root.join("usr/bin")).unwrap();
                fs::write(root.join("usr/bin/sudo"), "").unwrap();
                fs::create_dir_all(root.join("etc/sudoers.d")).unwrap();
                fs::write(root.join("etc/sudoers"), "@includedir /etc/sudoers.d\n").unwrap();
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

/// Test environment with a mock base rootfs and scratch output/cache dirs.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock base rootfs (stands in for the exported image)
    pub base: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub apt: Arc<FakeApt>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_apt(FakeApt::new())
    }

    pub fn with_apt(apt: FakeApt) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let base = root.join("base");
        let output_dir = root.join("output");
        let cache_dir = root.join("cache");
        create_mock_base(&base);

        Self {
            _temp_dir: temp_dir,
            base,
            output_dir,
            cache_dir,
            apt: Arc::new(apt),
        }
    }

    /// Options that provision from the mock base through the fake apt.
    pub fn options(&self, name: &str) -> ProvisionOptions {
        let mut opts = ProvisionOptions::new(self.output_dir.clone(), name, self.cache_dir.clone());
        opts.base_source = Some(self.base.clone());
        opts.package_manager = Some(self.apt.clone() as Arc<dyn PackageManager>);
        opts
    }
}

/// Stock profile on a pinned Debian base.
pub fn debian_profile() -> Profile {
    Profile::with_base(BaseImage::parse("debian:12.5-slim").unwrap())
}

/// Create a minimal Debian-like base rootfs.
pub fn create_mock_base(root: &Path) {
    for dir in ["etc/skel", "bin", "usr/bin", "var/lib/dpkg", "tmp"] {
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
    fs::write(root.join("etc/os-release"), "ID=debian\nVERSION_ID=\"12\"\n").unwrap();
    fs::write(root.join("etc/skel/.profile"), "# ~/.profile\n").unwrap();
    fs::write(root.join("bin/bash"), "").unwrap();
    fs::write(
        root.join(DPKG_STATUS),
        "Package: base-files\nStatus: install ok installed\nVersion: 12.4+deb12u5\n\n",
    )
    .unwrap();
}

/// Append a line to a file in the mock base.
pub fn append_to(root: &Path, relative: &str, line: &str) {
    let path = root.join(relative);
    let mut content = fs::read_to_string(&path).unwrap_or_default();
    content.push_str(line);
    content.push('\n');
    fs::write(path, content).unwrap();
}

/// Assert that a file exists at the given path.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains the given string.
pub fn assert_file_contains(path: &Path, needle: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        content.contains(needle),
        "Expected {} to contain '{}'\nContent:\n{}",
        path.display(),
        needle,
        content
    );
}
