//! Provisioning environment checks (directories, configuration, cache).

use std::fs;
use std::path::Path;

use crate::acquire::cached_export_path;
use crate::config::Config;
use crate::image::OsFamily;
use crate::packages::PackageCache;

use super::types::CheckResult;

pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = vec![
        check_writable("output dir", &config.output_dir),
        check_writable("cache dir", &config.cache_dir),
    ];

    let profile = match config.profile() {
        Ok(profile) => profile,
        Err(e) => {
            results.push(CheckResult::fail("configuration", &e.to_string()));
            return results;
        }
    };
    match profile.validate() {
        Ok(()) => results.push(CheckResult::pass_with(
            "configuration",
            &format!("{} as {} ({})", profile.base, profile.user.name, profile.identity),
        )),
        Err(e) => {
            results.push(CheckResult::fail("configuration", &e.to_string()));
            return results;
        }
    }

    match OsFamily::from_image(&profile.base) {
        Some(family) => results.push(CheckResult::pass_with("os family", family.as_str())),
        None => results.push(CheckResult::warn(
            "os family",
            "Not recognisable from the image name; detected from os-release after acquisition",
        )),
    }

    let export = cached_export_path(&config.cache_dir, &profile.base);
    if export.is_file() {
        results.push(CheckResult::pass_with("base image cache", &export.display().to_string()));
    } else {
        results.push(CheckResult::skip(
            "base image cache",
            "not exported yet, will be fetched on first provision",
        ));
    }

    let cache = PackageCache::new(&config.cache_dir);
    for family in [OsFamily::Debian, OsFamily::Redhat] {
        let name = format!("{} package cache lock", family);
        match cache.is_locked(family) {
            Ok(false) => results.push(CheckResult::pass(&name)),
            Ok(true) => results.push(CheckResult::warn(
                &name,
                "Held by another run; provisioning will wait for it",
            )),
            Err(e) => results.push(CheckResult::fail(&name, &format!("{:#}", e))),
        }
    }

    results
}

/// Can we create and write to `dir`?
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let marker = dir.join(".preflight-test");
    match fs::write(&marker, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;
    use tempfile::TempDir;

    fn config(dir: &Path) -> Config {
        let mut config = Config::defaults(dir);
        config.cache_dir = dir.join("cache");
        config
    }

    #[test]
    fn test_default_config_passes() {
        let dir = TempDir::new().unwrap();
        let results = check_environment(&config(dir.path()));
        assert!(results.iter().all(|c| c.status != CheckStatus::Fail), "{:?}", results);
        assert!(dir.path().join("output").is_dir());
    }

    #[test]
    fn test_floating_base_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.base_image = "debian:latest".to_string();
        let results = check_environment(&config);
        let check = results.iter().find(|c| c.name == "configuration").unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
    }
}
