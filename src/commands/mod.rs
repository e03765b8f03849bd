//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `provision` - Build an environment natively
//! - `render` - Emit the equivalent container build file
//! - `verify` - Check a provisioned environment
//! - `preflight` - Run preflight checks
//! - `show` - Display configuration or a manifest
//! - `clean` - Remove environments and caches

pub mod clean;
mod preflight;
pub mod provision;
pub mod render;
pub mod show;
mod verify;

use std::path::PathBuf;

use crate::component::builder::default_env_name;
use crate::config::Config;
use crate::error::ProvisionError;

pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use provision::cmd_provision;
pub use render::cmd_render;
pub use show::cmd_show;
pub use verify::cmd_verify;

/// Environment directory named on the command line, or the default one for
/// the configured profile.
fn env_dir(config: &Config, explicit: Option<PathBuf>) -> Result<PathBuf, ProvisionError> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(config.output_dir.join(default_env_name(&config.profile()?))),
    }
}
