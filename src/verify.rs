//! Verification of a provisioned environment.
//!
//! Everything is checked against the files in the environment itself, not
//! against what the manifest claims, except where the manifest is the only
//! record (the requested package list).

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::build::sudoers::{self, SUDOERS, SUDOERS_MODE};
use crate::build::users;
use crate::environment::ExecutableEnvironment;
use crate::image::OsFamily;
use crate::packages::apt::{parse_dpkg_status, DPKG_STATUS};
use crate::preflight::{CheckResult, Report};

const SUDO_PATHS: &[&str] = &["usr/bin/sudo", "bin/sudo"];

pub fn verify_environment(env: &ExecutableEnvironment) -> Result<Report> {
    let mut report = Report::new("Verification Results");
    let rootfs = env.rootfs();
    let manifest = &env.manifest;
    let user = &manifest.user;
    let id = manifest.identity;

    // Exactly one account carries the requested uid, with the requested
    // primary gid.
    let passwd = users::read_passwd(&rootfs)?;
    let holders: Vec<_> = passwd.iter().filter(|u| u.uid == id.uid).collect();
    report.push(match holders.as_slice() {
        [only] if only.name == user.name && only.gid == id.gid => CheckResult::pass_with(
            "user identity",
            &format!("{} is {}:{}", only.name, only.uid, only.gid),
        ),
        [only] => CheckResult::fail(
            "user identity",
            &format!(
                "uid {} belongs to {} with gid {}, expected {} with gid {}",
                id.uid, only.name, only.gid, user.name, id.gid
            ),
        ),
        [] => CheckResult::fail("user identity", &format!("no account has uid {}", id.uid)),
        many => CheckResult::fail(
            "user identity",
            &format!("{} accounts share uid {}", many.len(), id.uid),
        ),
    });

    let groups = users::read_group(&rootfs)?;
    let primary = user.groups.first().unwrap_or(&user.name);
    report.push(match groups.iter().find(|g| g.gid == id.gid) {
        Some(g) if &g.name == primary => {
            CheckResult::pass_with("primary group", &format!("{} is {}", g.name, g.gid))
        }
        Some(g) => CheckResult::fail(
            "primary group",
            &format!("gid {} is named {}, expected {}", id.gid, g.name, primary),
        ),
        None => CheckResult::fail("primary group", &format!("no group has gid {}", id.gid)),
    });

    let config = &env.config;
    report.push(if config.is_administrative() {
        CheckResult::fail(
            "default identity",
            &format!("runs as {} ({})", config.user, config.uid),
        )
    } else if config.uid != id.uid || config.user != user.name {
        CheckResult::fail(
            "default identity",
            &format!("runs as {} ({}), expected {}", config.user, config.uid, user.name),
        )
    } else {
        CheckResult::pass_with("default identity", &format!("{} ({})", config.user, config.uid))
    });

    report.extend(check_privilege(env)?);

    let memberships = users::groups_of(&rootfs, &user.name)?;
    report.push(CheckResult::from_bool(
        "hardware group",
        memberships.contains(&manifest.hardware_group),
        &format!("{} in {}", user.name, memberships.join(",")),
    ));

    report.push(if rootfs.join(user.home.trim_start_matches('/')).is_dir() {
        CheckResult::pass_with("home directory", &user.home)
    } else {
        CheckResult::fail("home directory", &format!("{} missing", user.home))
    });

    report.push(check_packages(env));

    Ok(report)
}

fn check_privilege(env: &ExecutableEnvironment) -> Result<Vec<CheckResult>> {
    let rootfs = env.rootfs();
    let name = &env.manifest.user.name;
    let mut results = Vec::new();

    let rules = sudoers::read_rules(&rootfs, name)?;
    results.push(match rules {
        Some(rules) if rules.iter().any(|r| r.grants_passwordless_root(name)) => {
            CheckResult::pass_with("passwordless escalation", &env.manifest.user.privilege.render())
        }
        Some(_) => CheckResult::fail(
            "passwordless escalation",
            &format!("drop-in for {} grants no passwordless root", name),
        ),
        None => CheckResult::fail("passwordless escalation", &format!("no drop-in for {}", name)),
    });

    let dropin = sudoers::dropin_path(&rootfs, name);
    if let Ok(meta) = fs::metadata(&dropin) {
        let mode = meta.permissions().mode() & 0o777;
        results.push(if mode == SUDOERS_MODE {
            CheckResult::pass("sudoers drop-in mode")
        } else {
            CheckResult::fail("sudoers drop-in mode", &format!("{:o}, sudo requires 440", mode))
        });
    }

    results.push(match fs::read_to_string(rootfs.join(SUDOERS)) {
        Ok(content) if sudoers::includes_dropins(&content) => CheckResult::pass("sudoers includes drop-ins"),
        Ok(_) => CheckResult::fail(
            "sudoers includes drop-ins",
            "etc/sudoers does not include /etc/sudoers.d",
        ),
        Err(_) => CheckResult::warn("sudoers includes drop-ins", "etc/sudoers missing"),
    });

    results.push(match SUDO_PATHS.iter().find(|p| rootfs.join(p).exists()) {
        Some(path) => CheckResult::pass_with("sudo binary", &format!("/{}", path)),
        None => CheckResult::fail("sudo binary", "sudo is not installed"),
    });

    Ok(results)
}

/// Requested packages must appear in the installed set. For Debian bases
/// the installed set is re-read from the dpkg database.
fn check_packages(env: &ExecutableEnvironment) -> CheckResult {
    let manifest = &env.manifest;
    let missing = manifest.missing_packages();
    if !missing.is_empty() {
        return CheckResult::fail("packages", &format!("missing: {}", missing.join(", ")));
    }

    if manifest.family == OsFamily::Debian {
        let status = fs::read_to_string(env.rootfs().join(DPKG_STATUS)).unwrap_or_default();
        let installed = parse_dpkg_status(&status);
        let gone: Vec<&str> = manifest
            .installed
            .keys()
            .filter(|name| !installed.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !gone.is_empty() {
            return CheckResult::fail(
                "packages",
                &format!("in manifest but not in dpkg status: {}", gone.join(", ")),
            );
        }
    }

    CheckResult::pass_with(
        "packages",
        &format!(
            "{} requested, {} installed",
            manifest.requested.len(),
            manifest.installed.len()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::executor::helpers::*;
    use crate::component::{provision, ProvisionOptions};
    use crate::image::BaseImage;
    use crate::packages::PackageManager;
    use crate::preflight::CheckStatus;
    use crate::profile::Profile;
    use std::sync::Arc;

    fn provisioned(env: &TestEnv) -> ExecutableEnvironment {
        let mut opts = ProvisionOptions::new(
            env.env_dir.join("output"),
            "debian-dev",
            env.cache_dir.clone(),
        );
        opts.base_source = Some(env.base.clone());
        opts.package_manager = Some(env.pm.clone() as Arc<dyn PackageManager>);
        let profile = Profile::with_base(BaseImage::parse("debian:12.5-slim").unwrap());
        provision(&profile, &opts).unwrap().environment().clone()
    }

    #[test]
    fn test_fresh_environment_verifies() {
        let env = TestEnv::new();
        fs::write(env.base.join("etc/sudoers"), "root ALL=(ALL:ALL) ALL\n").unwrap();
        let report = verify_environment(&provisioned(&env)).unwrap();
        assert!(report.all_passed(), "{:?}", report.checks);
        assert_eq!(report.get("hardware group").unwrap().status, CheckStatus::Pass);
    }

    #[test]
    fn test_removed_dropin_fails() {
        let env = TestEnv::new();
        let built = provisioned(&env);
        fs::remove_file(sudoers::dropin_path(&built.rootfs(), "dev")).unwrap();
        let report = verify_environment(&built).unwrap();
        assert_eq!(
            report.get("passwordless escalation").unwrap().status,
            CheckStatus::Fail
        );
    }

    #[test]
    fn test_duplicate_uid_fails() {
        let env = TestEnv::new();
        let built = provisioned(&env);
        let passwd = built.rootfs().join("etc/passwd");
        let mut content = fs::read_to_string(&passwd).unwrap();
        content.push_str("intruder:x:1000:1000::/home/intruder:/bin/sh\n");
        fs::write(&passwd, content).unwrap();

        let report = verify_environment(&built).unwrap();
        assert_eq!(report.get("user identity").unwrap().status, CheckStatus::Fail);
    }

    #[test]
    fn test_root_default_identity_fails() {
        let env = TestEnv::new();
        let mut built = provisioned(&env);
        built.config.user = "root".into();
        built.config.uid = 0;
        let report = verify_environment(&built).unwrap();
        assert_eq!(report.get("default identity").unwrap().status, CheckStatus::Fail);
    }
}
