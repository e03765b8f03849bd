//! Shared utilities across envforge modules.

pub mod files;
pub mod staging;

pub use files::{copy_tree, write_file_mode, write_file_with_dirs, write_json};
pub use staging::{BuildLock, StagingDir};
