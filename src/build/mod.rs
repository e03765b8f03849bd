//! Edits applied to an environment's root filesystem.
//!
//! - `context`: BuildContext shared by all steps
//! - `users`: passwd/group/shadow manipulation
//! - `sudoers`: privilege-escalation rules

pub mod context;
pub mod sudoers;
pub mod users;

pub use context::BuildContext;
