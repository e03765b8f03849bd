//! Base handlers: Op::RequirePinnedBase, Op::AcquireBase, Op::RequireGroup

use anyhow::{bail, Result};

use crate::acquire;
use crate::build::context::BuildContext;
use crate::build::users;
use crate::error::ProvisionError;

pub fn handle_require_pinned(ctx: &BuildContext) -> Result<()> {
    ctx.base.require_pinned()?;
    Ok(())
}

pub fn handle_acquire(ctx: &BuildContext) -> Result<()> {
    acquire::acquire(ctx)
}

/// The group has to come with the base image; inventing one would give it
/// an id no udev rule knows about.
pub fn handle_require_group(ctx: &BuildContext, name: &str) -> Result<()> {
    if users::find_group(&ctx.rootfs, name)?.is_none() {
        bail!(ProvisionError::config(format!(
            "group '{}' is not defined by base image '{}'",
            name, ctx.base
        )));
    }
    Ok(())
}
