//! Host tool availability checks.

use crate::acquire::ENGINES;
use crate::process;

use super::types::CheckResult;

/// Tools native provisioning runs on the host.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("chroot", "coreutils", "Required to run the package manager inside the environment"),
    ("mount", "util-linux", "Required to mount /proc and /dev into the environment"),
    ("umount", "util-linux", "Required to release environment mounts"),
];

pub fn check_host_tools(engine: Option<&str>, has_rootfs: bool) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, true));
    }

    // An engine is only needed when the base has to be exported
    let engine_check = match engine {
        Some(engine) => check_tool_exists(engine, engine, "Configured container engine", !has_rootfs),
        None => match ENGINES.iter().find_map(|e| process::which(e).map(|p| (e, p))) {
            Some((name, path)) => {
                CheckResult::pass_with("container engine", &format!("{} ({})", name, path.display()))
            }
            None if has_rootfs => CheckResult::skip("container engine", "base rootfs given explicitly"),
            None => CheckResult::warn(
                "container engine",
                &format!(
                    "None of {} found. Base images must be supplied with --rootfs or already exported.",
                    ENGINES.join(", ")
                ),
            ),
        },
    };
    results.push(engine_check);

    if process::is_root() {
        results.push(CheckResult::pass("root privileges"));
    } else {
        results.push(CheckResult::fail(
            "root privileges",
            "Native provisioning needs root for chroot, mounts and file ownership. Use `envforge render` for rootless builds.",
        ));
    }

    results
}

fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}'. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
