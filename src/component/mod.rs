//! Declarative provisioning plan.
//!
//! A provisioning run is a list of [`Step`]s, each a named bundle of
//! [`Op`]s tagged with the [`Phase`] it belongs to. Definitions say WHAT
//! has to happen; the executor is the single place that knows HOW.
//!
//! ```text
//! Plan (DATA)                         Executor (LOGIC)
//! ───────────────────────             ─────────────────
//! Step {                              for op in step.ops {
//!   name: "accounts",                   execute_op(ctx, op)?;
//!   ops: [                            }
//!     CreateGroup { "dev", 1000 },
//!     CreateUser { "dev", 1000, .. },
//!   ]
//! }
//! ```
//!
//! The same plan drives both native provisioning and the container build
//! file renderer, so the two cannot drift apart.

pub mod builder;
pub mod definitions;
pub mod executor;
pub mod render;

pub use builder::{provision, ProvisionOptions, ProvisionOutcome};
pub use definitions::provisioning_plan;

use std::fmt;

use crate::build::sudoers::PrivilegeRule;
use crate::packages::PackageSet;

/// Provisioning phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Pinned base image becomes the environment root.
    Base = 1,
    /// Package index refresh and installation.
    Packages = 2,
    /// Primary group and user.
    Accounts = 3,
    /// Passwordless escalation rule.
    Privileges = 4,
    /// Hardware-access group membership.
    Devices = 5,
    /// Default execution identity.
    Runtime = 6,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Base => "base",
            Phase::Packages => "packages",
            Phase::Accounts => "accounts",
            Phase::Privileges => "privileges",
            Phase::Devices => "devices",
            Phase::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// A single provisioning operation.
///
/// Every operation is idempotent against a tree it already produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    // ─────────────────────────────────────────────────────────────────────
    // Base
    // ─────────────────────────────────────────────────────────────────────
    /// Refuse to continue on a floating base reference.
    RequirePinnedBase,

    /// Populate the environment root from the base image.
    AcquireBase,

    /// The base image must already define this group.
    RequireGroup(String),

    // ─────────────────────────────────────────────────────────────────────
    // Packages
    // ─────────────────────────────────────────────────────────────────────
    /// Refresh the index and install, under the shared cache lock.
    InstallPackages(PackageSet),

    // ─────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────
    /// Ensure a group exists with exactly this id.
    CreateGroup { name: String, gid: u32 },

    /// Ensure a user exists with exactly this id, with home and shell.
    CreateUser {
        name: String,
        uid: u32,
        gid: u32,
        home: String,
        shell: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Privileges and devices
    // ─────────────────────────────────────────────────────────────────────
    /// Install a sudoers drop-in for the rule's subject.
    GrantPrivilege(PrivilegeRule),

    /// Add a user to an existing group.
    AddToGroup { group: String, user: String },

    // ─────────────────────────────────────────────────────────────────────
    // Runtime
    // ─────────────────────────────────────────────────────────────────────
    /// Record the identity commands run as by default.
    SetDefaultUser {
        name: String,
        uid: u32,
        gid: u32,
        home: String,
        shell: String,
    },
}

/// A named group of operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub phase: Phase,
    pub ops: Vec<Op>,
}

impl Step {
    pub fn new(name: &'static str, phase: Phase, ops: Vec<Op>) -> Self {
        Self { name, phase, ops }
    }
}
