//! Step executor: interprets [`Op`] variants against the environment root.
//!
//! Handlers live in submodules by concern:
//! - `base` - pin check, base acquisition, base group checks
//! - `packages` - locked index refresh and install
//! - `users` - groups, users, privilege rules, memberships
//! - `runtime` - default execution identity
//!
//! The executor is the single place where provisioning operations are
//! implemented. The renderer only ever reads the plan.

mod base;
mod packages;
mod runtime;
mod users;

#[cfg(test)]
pub(crate) mod helpers;

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use super::{Op, Step};
use crate::build::context::BuildContext;
use crate::environment::RuntimeConfig;
use crate::image::OsFamily;

/// What the steps found out while running. Feeds the manifest.
#[derive(Debug, Default)]
pub struct RunState {
    pub family: Option<OsFamily>,
    pub installed: BTreeMap<String, String>,
    /// Requested names satisfied by a differently named package.
    pub resolved: BTreeMap<String, String>,
    pub runtime: Option<RuntimeConfig>,
}

/// Execute all operations of a step.
pub fn execute(ctx: &BuildContext, step: &Step, state: &mut RunState) -> Result<()> {
    println!("Provisioning {}...", step.name);

    for op in &step.ops {
        execute_op(ctx, op, state)
            .with_context(|| format!("in step '{}': {}", step.name, describe(op)))?;
    }

    Ok(())
}

/// Short form of an op for error context. Avoids dumping whole package sets.
fn describe(op: &Op) -> String {
    match op {
        Op::RequirePinnedBase => "require pinned base".to_string(),
        Op::AcquireBase => "acquire base".to_string(),
        Op::RequireGroup(name) => format!("require group '{}'", name),
        Op::InstallPackages(set) => format!("install {}", set),
        Op::CreateGroup { name, gid } => format!("create group {}({})", name, gid),
        Op::CreateUser { name, uid, .. } => format!("create user {}({})", name, uid),
        Op::GrantPrivilege(rule) => format!("grant privilege to {}", rule.subject),
        Op::AddToGroup { group, user } => format!("add {} to {}", user, group),
        Op::SetDefaultUser { name, .. } => format!("set default user {}", name),
    }
}

/// Execute a single operation by routing to the appropriate handler.
fn execute_op(ctx: &BuildContext, op: &Op, state: &mut RunState) -> Result<()> {
    match op {
        // Base
        Op::RequirePinnedBase => base::handle_require_pinned(ctx)?,
        Op::AcquireBase => base::handle_acquire(ctx)?,
        Op::RequireGroup(name) => base::handle_require_group(ctx, name)?,

        // Packages
        Op::InstallPackages(set) => packages::handle_install(ctx, set, state)?,

        // Accounts, privileges, devices
        Op::CreateGroup { name, gid } => users::handle_group(ctx, name, *gid)?,
        Op::CreateUser {
            name,
            uid,
            gid,
            home,
            shell,
        } => users::handle_user(ctx, name, *uid, *gid, home, shell)?,
        Op::GrantPrivilege(rule) => users::handle_privilege(ctx, rule)?,
        Op::AddToGroup { group, user } => users::handle_membership(ctx, group, user)?,

        // Runtime
        Op::SetDefaultUser {
            name,
            uid,
            gid,
            home,
            shell,
        } => runtime::handle_default_user(ctx, name, *uid, *gid, home, shell, state)?,
    }

    Ok(())
}
