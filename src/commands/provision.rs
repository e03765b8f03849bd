//! Provision command - builds an environment natively.

use anyhow::Result;
use std::path::PathBuf;

use crate::component::builder::default_env_name;
use crate::component::{provision, ProvisionOptions};
use crate::config::Config;
use crate::preflight;

pub struct ProvisionArgs {
    /// Base rootfs directory or tarball instead of exporting the image
    pub rootfs: Option<PathBuf>,
    /// Environment directory name under the output dir
    pub name: Option<String>,
    pub force: bool,
    pub skip_preflight: bool,
}

/// Execute the provision command.
pub fn cmd_provision(config: &Config, args: ProvisionArgs) -> Result<()> {
    // Configuration errors surface before any host checks or mutation
    let profile = config.profile()?;
    profile.validate()?;

    if !args.skip_preflight {
        preflight::run_preflight_or_fail(config, args.rootfs.is_some(), false)?;
    }

    let name = args.name.unwrap_or_else(|| default_env_name(&profile));
    let mut opts = ProvisionOptions::new(config.output_dir.clone(), &name, config.cache_dir.clone());
    opts.base_source = args.rootfs;
    opts.engine = config.engine.clone();
    opts.force = args.force;

    let outcome = provision(&profile, &opts)?;
    let env = outcome.environment();
    let user = &env.manifest.user;

    println!();
    println!("  Directory:  {}", env.dir.display());
    println!("  Base:       {} ({})", env.manifest.base_image, env.manifest.family);
    println!(
        "  User:       {} ({}:{}), groups {}",
        user.name,
        user.uid,
        user.gid,
        user.groups.join(",")
    );
    println!("  Privilege:  {}", user.privilege);
    println!(
        "  Packages:   {} requested, {} installed",
        env.manifest.requested.len(),
        env.manifest.installed.len()
    );
    Ok(())
}
