//! The explicit provisioning configuration.
//!
//! A [`Profile`] carries everything that determines an environment: the
//! pinned base image, the package set, the identity pair, the account
//! layout and the hardware-access group. Nothing else feeds into a build.

use serde::{Deserialize, Serialize};

use crate::build::sudoers::PrivilegeRule;
use crate::build::users;
use crate::cache;
use crate::error::ProvisionError;
use crate::identity::IdentityPair;
use crate::image::BaseImage;
use crate::packages::PackageSet;

pub const DEFAULT_BASE_IMAGE: &str = "debian:12.5-slim";
pub const DEFAULT_USERNAME: &str = "dev";
pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_HARDWARE_GROUP: &str = "plugdev";

/// Account layout of the user to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub home: String,
    pub shell: String,
}

impl UserSpec {
    /// `name` with home `/home/<name>` and the given shell.
    pub fn new(name: &str, shell: &str) -> Self {
        Self {
            name: name.to_string(),
            home: format!("/home/{}", name),
            shell: shell.to_string(),
        }
    }
}

impl Default for UserSpec {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME, DEFAULT_SHELL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub base: BaseImage,
    pub packages: PackageSet,
    pub identity: IdentityPair,
    pub user: UserSpec,
    pub hardware_group: String,
}

/// The user as it exists once provisioning finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedUser {
    pub name: String,
    pub home: String,
    pub shell: String,
    pub uid: u32,
    pub gid: u32,
    /// Primary group first, then supplementary groups.
    pub groups: Vec<String>,
    pub privilege: PrivilegeRule,
}

impl Profile {
    /// Stock profile on an explicit base reference.
    pub fn with_base(base: BaseImage) -> Self {
        Self {
            base,
            packages: PackageSet::defaults(),
            identity: IdentityPair::default(),
            user: UserSpec::default(),
            hardware_group: DEFAULT_HARDWARE_GROUP.to_string(),
        }
    }

    /// Configuration-level checks. Runs before anything touches disk.
    ///
    /// Pinning comes first: an unpinned base must be reported as such even
    /// if other fields are also wrong.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        self.base.require_pinned()?;
        self.identity.validate()?;
        users::validate_name("user", &self.user.name)?;
        users::validate_name("group", &self.hardware_group)?;

        if !self.user.home.starts_with('/') || !self.user.shell.starts_with('/') {
            return Err(ProvisionError::config(format!(
                "home '{}' and shell '{}' must be absolute paths",
                self.user.home, self.user.shell
            )));
        }
        if self.user.name == self.hardware_group {
            return Err(ProvisionError::config(format!(
                "user name '{}' clashes with the hardware-access group",
                self.user.name
            )));
        }
        if !self.packages.contains("sudo") {
            log::warn!("package set has no 'sudo'; the privilege rule relies on the base image providing it");
        }
        Ok(())
    }

    /// Name of the user's primary group (user-private-group convention).
    pub fn primary_group(&self) -> &str {
        &self.user.name
    }

    pub fn privilege_rule(&self) -> PrivilegeRule {
        PrivilegeRule::passwordless(&self.user.name)
    }

    pub fn provisioned_user(&self) -> ProvisionedUser {
        ProvisionedUser {
            name: self.user.name.clone(),
            home: self.user.home.clone(),
            shell: self.user.shell.clone(),
            uid: self.identity.uid,
            gid: self.identity.gid,
            groups: vec![self.primary_group().to_string(), self.hardware_group.clone()],
            privilege: self.privilege_rule(),
        }
    }

    /// Hash over every field that shapes the environment.
    pub fn inputs_hash(&self) -> String {
        let base = self.base.to_string();
        let packages = self.packages.to_string();
        let uid = self.identity.uid.to_string();
        let gid = self.identity.gid.to_string();
        cache::hash_inputs([
            ("base", base.as_str()),
            ("packages", packages.as_str()),
            ("uid", uid.as_str()),
            ("gid", gid.as_str()),
            ("user", self.user.name.as_str()),
            ("home", self.user.home.as_str()),
            ("shell", self.user.shell.as_str()),
            ("hardware_group", self.hardware_group.as_str()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::with_base(BaseImage::parse(DEFAULT_BASE_IMAGE).unwrap())
    }

    #[test]
    fn test_default_profile_is_valid() {
        let p = profile();
        p.validate().unwrap();
        assert_eq!(p.identity, IdentityPair::new(1000, 1000));
        assert_eq!(p.user.home, "/home/dev");
        assert_eq!(p.hardware_group, "plugdev");
    }

    #[test]
    fn test_unpinned_reported_first() {
        let mut p = profile();
        p.base = BaseImage::parse("debian:latest").unwrap();
        p.identity = IdentityPair::new(0, 0);
        assert!(matches!(p.validate(), Err(ProvisionError::Config(_))));
    }

    #[test]
    fn test_root_identity_rejected() {
        let mut p = profile();
        p.identity = IdentityPair::new(0, 1000);
        assert!(matches!(p.validate(), Err(ProvisionError::Identity(_))));
    }

    #[test]
    fn test_provisioned_user_groups() {
        let user = profile().provisioned_user();
        assert_eq!(user.groups, vec!["dev", "plugdev"]);
        assert!(user.privilege.grants_passwordless_root("dev"));
    }

    #[test]
    fn test_inputs_hash_tracks_identity() {
        let a = profile();
        let mut b = profile();
        assert_eq!(a.inputs_hash(), b.inputs_hash());
        b.identity = IdentityPair::new(1001, 1001);
        assert_ne!(a.inputs_hash(), b.inputs_hash());
    }
}
