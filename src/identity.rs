//! Host-matching numeric identity for the provisioned user.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

/// Administrative identity. Never handed to the provisioned user.
pub const ROOT_ID: u32 = 0;

/// `nobody` / `nogroup` on every mainstream distribution.
pub const OVERFLOW_ID: u32 = 65534;

/// `(uid_t)-1` means "unchanged" to chown(2) and friends.
pub const INVALID_ID: u32 = u32::MAX;

/// First id handed out to regular users by `useradd` on Debian and Fedora.
pub const FIRST_REGULAR_ID: u32 = 1000;

/// Numeric (UID, GID) pair applied to the provisioned user and its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPair {
    pub uid: u32,
    pub gid: u32,
}

impl Default for IdentityPair {
    fn default() -> Self {
        Self {
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
        }
    }
}

impl IdentityPair {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Reject ids that can never belong to an unprivileged user.
    ///
    /// Collisions with ids already present in the base image are checked
    /// later, against its account database.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        check_id("UID", self.uid)?;
        check_id("GID", self.gid)?;
        if self.uid < FIRST_REGULAR_ID || self.gid < FIRST_REGULAR_ID {
            log::warn!(
                "identity {} is inside the system id range (< {}); it must not clash with base image accounts",
                self,
                FIRST_REGULAR_ID
            );
        }
        Ok(())
    }

    /// Identity of the user running envforge, for aligning with the host.
    pub fn current() -> Self {
        // SAFETY: getuid/getgid never fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { uid, gid }
    }
}

fn check_id(kind: &str, id: u32) -> Result<(), ProvisionError> {
    match id {
        ROOT_ID => Err(ProvisionError::identity(format!(
            "{} 0 is the administrative identity",
            kind
        ))),
        OVERFLOW_ID => Err(ProvisionError::identity(format!(
            "{} {} is reserved for the overflow user/group (nobody/nogroup)",
            kind, OVERFLOW_ID
        ))),
        INVALID_ID => Err(ProvisionError::identity(format!(
            "{} {} is the invalid id sentinel",
            kind, INVALID_ID
        ))),
        _ => Ok(()),
    }
}

impl fmt::Display for IdentityPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Parses `UID:GID` or a bare `UID` (GID then equals UID).
impl FromStr for IdentityPair {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str, kind: &str| {
            part.trim().parse::<u32>().map_err(|_| {
                ProvisionError::config(format!("invalid {} '{}' in identity '{}'", kind, part, s))
            })
        };
        match s.split_once(':') {
            Some((uid, gid)) => Ok(Self::new(parse(uid, "UID")?, parse(gid, "GID")?)),
            None => {
                let uid = parse(s, "UID")?;
                Ok(Self::new(uid, uid))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_1000() {
        assert_eq!(IdentityPair::default(), IdentityPair::new(1000, 1000));
    }

    #[test]
    fn test_root_rejected() {
        assert!(matches!(
            IdentityPair::new(0, 1000).validate(),
            Err(ProvisionError::Identity(_))
        ));
        assert!(matches!(
            IdentityPair::new(1000, 0).validate(),
            Err(ProvisionError::Identity(_))
        ));
    }

    #[test]
    fn test_reserved_ids_rejected() {
        assert!(IdentityPair::new(OVERFLOW_ID, 1000).validate().is_err());
        assert!(IdentityPair::new(1000, INVALID_ID).validate().is_err());
    }

    #[test]
    fn test_unprivileged_ranges_accepted() {
        for (uid, gid) in [(1000, 1000), (1001, 100), (501, 20), (60000, 60000), (200000, 200000)] {
            assert!(IdentityPair::new(uid, gid).validate().is_ok(), "{}:{}", uid, gid);
        }
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!("1001:1002".parse::<IdentityPair>().unwrap(), IdentityPair::new(1001, 1002));
        assert_eq!("1005".parse::<IdentityPair>().unwrap(), IdentityPair::new(1005, 1005));
        assert!("abc:1".parse::<IdentityPair>().is_err());
    }
}
