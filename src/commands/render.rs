//! Render command - prints or writes the container build file.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::common::write_file_with_dirs;
use crate::component::render::render_containerfile;
use crate::config::Config;
use crate::error::ProvisionError;
use crate::image::OsFamily;

/// Parse a `--family` value.
pub fn parse_family(value: &str) -> Result<OsFamily, ProvisionError> {
    match value.to_ascii_lowercase().as_str() {
        "debian" | "apt" => Ok(OsFamily::Debian),
        "redhat" | "rhel" | "fedora" | "dnf" => Ok(OsFamily::Redhat),
        other => Err(ProvisionError::config(format!(
            "unknown OS family '{}' (expected debian or redhat)",
            other
        ))),
    }
}

/// Execute the render command.
pub fn cmd_render(config: &Config, family: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let profile = config.profile()?;
    let family = match family {
        Some(value) => parse_family(value)?,
        None => OsFamily::from_image(&profile.base).ok_or_else(|| {
            ProvisionError::config(format!(
                "cannot tell the OS family of '{}' from its name; pass --family",
                profile.base
            ))
        })?,
    };

    let content = render_containerfile(&profile, family)?;
    match output {
        Some(path) => {
            write_file_with_dirs(&path, &content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            println!(
                "Build with: docker build --build-arg UID=$(id -u) --build-arg GID=$(id -g) -f {} .",
                path.display()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}
