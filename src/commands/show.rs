//! Show command - displays information.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::environment::MANIFEST_FILE;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config { json: bool },
    /// Show an environment's manifest
    Manifest { env: Option<PathBuf> },
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                config.print();
            }
        }
        ShowTarget::Manifest { env } => {
            let dir = super::env_dir(config, env)?;
            let path = dir.join(MANIFEST_FILE);
            if !path.exists() {
                anyhow::bail!(
                    "No manifest at {}. Run 'envforge provision' first.",
                    path.display()
                );
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            print!("{}", content);
        }
    }
    Ok(())
}
