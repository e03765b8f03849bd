//! Verify command - checks a provisioned environment.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::environment::ExecutableEnvironment;
use crate::verify::verify_environment;

/// Execute the verify command.
pub fn cmd_verify(config: &Config, env: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = super::env_dir(config, env)?;
    let environment = ExecutableEnvironment::load(&dir)?;
    let report = verify_environment(&environment)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Verifying {}\n", dir.display());
        report.print();
    }

    if !report.all_passed() {
        bail!("Verification failed: {} check(s) failed", report.fail_count());
    }
    Ok(())
}
