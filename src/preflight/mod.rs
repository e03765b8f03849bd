//! Preflight checks for native provisioning.
//!
//! Validates host tools, directories and configuration before anything is
//! built. Run with `envforge preflight`.

mod environment;
mod host_tools;
pub mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, Report};

/// Run all preflight checks.
pub fn run_preflight(config: &Config, has_rootfs: bool) -> Report {
    let mut report = Report::new("Preflight Check Results");

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    report.extend(host_tools::check_host_tools(config.engine.as_deref(), has_rootfs));

    println!("Checking provisioning environment...");
    report.extend(environment::check_environment(config));

    println!();
    report
}

/// Run preflight and bail if any check fails. In strict mode warnings fail
/// too.
pub fn run_preflight_or_fail(config: &Config, has_rootfs: bool, strict: bool) -> Result<()> {
    let report = run_preflight(config, has_rootfs);
    report.print();

    let failures = report.fail_count() + if strict { report.warn_count() } else { 0 };
    if failures > 0 {
        bail!(
            "Preflight failed: {} check(s) failed{}. Fix the issues above before provisioning.",
            failures,
            if strict { " (strict)" } else { "" }
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
