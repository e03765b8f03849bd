//! Clean command - removes environments and caches.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Provisioned environments only (default)
    Outputs,
    /// Exported images and cached packages
    Cache,
    /// Everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Outputs => clean::clean_outputs(&config.output_dir),
        CleanTarget::Cache => clean::clean_cache(&config.cache_dir),
        CleanTarget::All => clean::clean_all(&config.output_dir, &config.cache_dir),
    }
}
