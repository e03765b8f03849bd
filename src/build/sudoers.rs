//! Privilege escalation policy.
//!
//! Passwordless sudo is modelled as a [`PrivilegeRule`] record rather than a
//! blind file edit. The rule is rendered into a per-user drop-in under
//! `etc/sudoers.d/` and can be parsed back, so a produced environment can
//! be audited structurally.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::files::write_file_mode;

pub const SUDOERS: &str = "etc/sudoers";
pub const SUDOERS_D: &str = "etc/sudoers.d";

/// sudo refuses to read sudoers files with any other mode.
pub const SUDOERS_MODE: u32 = 0o440;

const INCLUDEDIR_LINE: &str = "@includedir /etc/sudoers.d";

/// A sudoers rule granting one user administrative escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeRule {
    /// The single user the rule applies to (never a `%group`).
    pub subject: String,
    /// Host list, `ALL` for containers.
    pub hosts: String,
    /// Run-as specification, e.g. `ALL:ALL`.
    pub run_as: String,
    /// Command list.
    pub commands: String,
    pub requires_password: bool,
}

impl PrivilegeRule {
    /// Full administrative access for `user`, no password.
    pub fn passwordless(user: &str) -> Self {
        Self {
            subject: user.to_string(),
            hosts: "ALL".to_string(),
            run_as: "ALL:ALL".to_string(),
            commands: "ALL".to_string(),
            requires_password: false,
        }
    }

    /// Does this rule give `user` unrestricted root without a password?
    pub fn grants_passwordless_root(&self, user: &str) -> bool {
        self.subject == user
            && !self.requires_password
            && self.hosts == "ALL"
            && (self.run_as == "ALL" || self.run_as == "ALL:ALL" || self.run_as == "root")
            && self.commands == "ALL"
    }

    /// Render as a sudoers line.
    pub fn render(&self) -> String {
        let tag = if self.requires_password { "" } else { "NOPASSWD: " };
        format!(
            "{} {}=({}) {}{}",
            self.subject, self.hosts, self.run_as, tag, self.commands
        )
    }

    /// Parse a single `user host=(runas) [TAG:] commands` line.
    ///
    /// Group rules (`%name`), aliases and defaults are not this module's
    /// business and yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
            return None;
        }
        if line.starts_with("Defaults") || line.contains("_Alias") || line.starts_with('@') {
            return None;
        }

        let (subject, rest) = line.split_once(char::is_whitespace)?;
        let (hosts, rest) = rest.trim().split_once('=')?;
        let rest = rest.trim();

        let (run_as, rest) = match rest.strip_prefix('(') {
            Some(r) => {
                let (run_as, rest) = r.split_once(')')?;
                (run_as.trim().to_string(), rest.trim())
            }
            None => ("root".to_string(), rest),
        };

        let mut requires_password = true;
        let mut commands = rest;
        // Tags like NOPASSWD: SETENV: precede the command list
        while let Some((tag, after)) = commands.split_once(':') {
            let tag = tag.trim();
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                break;
            }
            match tag {
                "NOPASSWD" => requires_password = false,
                "PASSWD" => requires_password = true,
                _ => {}
            }
            commands = after.trim();
        }

        Some(Self {
            subject: subject.to_string(),
            hosts: hosts.trim().to_string(),
            run_as,
            commands: commands.trim().to_string(),
            requires_password,
        })
    }
}

impl fmt::Display for PrivilegeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// File name of a user's drop-in. sudo skips names containing '.' or
/// ending in '~', so those characters are replaced.
pub fn dropin_name(user: &str) -> String {
    user.chars()
        .map(|c| if c == '.' || c == '~' { '_' } else { c })
        .collect()
}

pub fn dropin_path(rootfs: &Path, user: &str) -> PathBuf {
    rootfs.join(SUDOERS_D).join(dropin_name(user))
}

/// Write the rule as the subject's drop-in and make sure the main sudoers
/// file includes the drop-in directory.
pub fn install_rule(rootfs: &Path, rule: &PrivilegeRule) -> Result<PathBuf> {
    let path = dropin_path(rootfs, &rule.subject);
    let content = format!(
        "# Managed by envforge: administrative access for {}\n{}\n",
        rule.subject,
        rule.render()
    );
    write_file_mode(&path, content, SUDOERS_MODE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    ensure_includedir(rootfs)?;
    Ok(path)
}

/// Rules found in the subject's drop-in, or `None` if there is no drop-in.
pub fn read_rules(rootfs: &Path, user: &str) -> Result<Option<Vec<PrivilegeRule>>> {
    let path = dropin_path(rootfs, user);
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(content.lines().filter_map(PrivilegeRule::parse).collect()))
}

/// True if `etc/sudoers` pulls in `etc/sudoers.d`. Both the modern `@` and
/// legacy `#` spellings count.
pub fn includes_dropins(sudoers: &str) -> bool {
    sudoers.lines().any(|line| {
        let line = line.trim();
        (line.starts_with("@includedir") || line.starts_with("#includedir"))
            && line.ends_with("/etc/sudoers.d")
    })
}

/// Append the includedir directive if the base image's sudoers lacks it.
/// A missing sudoers file is left alone: the sudo package provides one.
fn ensure_includedir(rootfs: &Path) -> Result<()> {
    let path = rootfs.join(SUDOERS);
    if !path.exists() {
        log::warn!(
            "{} not present, relying on the sudo package to include sudoers.d",
            path.display()
        );
        return Ok(());
    }
    let mut content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    if includes_dropins(&content) {
        return Ok(());
    }
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(INCLUDEDIR_LINE);
    content.push('\n');
    write_file_mode(&path, content, SUDOERS_MODE)
}
