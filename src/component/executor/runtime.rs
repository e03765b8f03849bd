//! Runtime handler: Op::SetDefaultUser

use anyhow::{bail, Result};

use super::RunState;
use crate::build::context::BuildContext;
use crate::common::write_json;
use crate::environment::{RuntimeConfig, CONFIG_FILE};
use crate::error::ProvisionError;

pub fn handle_default_user(
    ctx: &BuildContext,
    name: &str,
    uid: u32,
    gid: u32,
    home: &str,
    shell: &str,
    state: &mut RunState,
) -> Result<()> {
    let config = RuntimeConfig::for_user(name, uid, gid, home, shell);
    if config.is_administrative() {
        bail!(ProvisionError::identity(format!(
            "default identity '{}' ({}) is administrative",
            name, uid
        )));
    }
    write_json(ctx.env_dir.join(CONFIG_FILE), &config)?;
    state.runtime = Some(config);
    Ok(())
}
