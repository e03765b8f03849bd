//! Package handler: Op::InstallPackages

use anyhow::{bail, Result};

use super::RunState;
use crate::build::context::BuildContext;
use crate::error::ProvisionError;
use crate::image::OsFamily;
use crate::packages::{cache, resolve_installed, PackageSet};

/// Refresh and install while holding the family's cache lock, then move
/// downloaded files back to the shared cache and out of the environment.
pub fn handle_install(ctx: &BuildContext, set: &PackageSet, state: &mut RunState) -> Result<()> {
    let family = OsFamily::detect(&ctx.rootfs, &ctx.base)?;
    state.family = Some(family);

    let pm = ctx.package_manager(family);
    if pm.family() != family {
        bail!(ProvisionError::config(format!(
            "{} package manager cannot install into a {} base",
            pm.family(),
            family
        )));
    }
    let dirs = pm.cache_dirs();
    let before = pm.installed(&ctx.rootfs)?;

    {
        let lock = ctx.cache.lock(family)?;
        lock.seed(&ctx.rootfs, dirs)?;
        println!("  Refreshing package index...");
        pm.refresh_index(&ctx.rootfs)?;
        println!("  Installing {}...", set);
        pm.install(&ctx.rootfs, set)?;
        lock.harvest(&ctx.rootfs, dirs)?;
    }
    cache::purge(&ctx.rootfs, dirs)?;

    let installed = pm.installed(&ctx.rootfs)?;
    let resolved = resolve_installed(family, set, &before, &installed).map_err(|missing| {
        ProvisionError::install(format!(
            "package manager finished but {} not installed",
            missing.join(", ")
        ))
    })?;
    for (requested, actual) in &resolved {
        log::warn!("{} was installed as {}", requested, actual);
    }

    log::info!("{} packages installed in total", installed.len());
    state.installed = installed;
    state.resolved = resolved;
    Ok(())
}
