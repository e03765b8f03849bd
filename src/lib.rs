//! envforge - reproducible development environments.
//!
//! Provisions an environment from a pinned base image with a non-root user
//! whose UID/GID match the host, passwordless sudo, and membership in the
//! USB hardware-access group. Packages come through a shared, lock-protected
//! cache.
//!
//! The same plan can be applied natively ([`component::provision`]) or
//! rendered as a container build file ([`component::render`]).

pub mod acquire;
pub mod build;
pub mod cache;
pub mod chroot;
pub mod clean;
pub mod commands;
pub mod common;
pub mod component;
pub mod config;
pub mod environment;
pub mod error;
pub mod identity;
pub mod image;
pub mod packages;
pub mod preflight;
pub mod process;
pub mod profile;
pub mod timing;
pub mod verify;

pub use component::{provision, provisioning_plan, ProvisionOptions, ProvisionOutcome};
pub use environment::ExecutableEnvironment;
pub use error::ProvisionError;
pub use profile::Profile;
