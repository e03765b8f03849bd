//! User and group management.
//!
//! Accounts are added by editing `etc/passwd`, `etc/group` and their
//! shadow companions inside the environment directly, so provisioning does
//! not depend on which account tools the base image ships.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::ProvisionError;

pub const PASSWD: &str = "etc/passwd";
pub const GROUP: &str = "etc/group";
pub const SHADOW: &str = "etc/shadow";
pub const GSHADOW: &str = "etc/gshadow";
pub const SKEL: &str = "etc/skel";

/// Mode for newly created home directories.
pub const HOME_MODE: u32 = 0o750;

/// One line of `etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

/// One line of `etc/group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_.-]{0,30}[$]?$").expect("static regex"))
}

/// Check a user or group name against the portable useradd rules.
pub fn validate_name(kind: &str, name: &str) -> Result<(), ProvisionError> {
    if !username_re().is_match(name) {
        return Err(ProvisionError::config(format!(
            "invalid {} name '{}' (lowercase letters, digits, '_', '-', '.'; at most 32 characters)",
            kind, name
        )));
    }
    if name == "root" {
        return Err(ProvisionError::identity(format!(
            "{} name 'root' is the administrative identity",
            kind
        )));
    }
    Ok(())
}

fn read_db(rootfs: &Path, relative: &str) -> Result<Option<String>> {
    let path = rootfs.join(relative);
    // File not existing is fine - the database is just empty
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(content))
}

fn parse_id(field: &str, what: &str, line: &str, path: &str) -> Result<u32> {
    field.parse().with_context(|| {
        format!("Corrupted {} file: invalid {} '{}' in line '{}'", path, what, field, line)
    })
}

/// Read all passwd entries. Missing file yields an empty list; a corrupted
/// file is an error.
pub fn read_passwd(rootfs: &Path) -> Result<Vec<PasswdEntry>> {
    let Some(content) = read_db(rootfs, PASSWD)? else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 7 {
            bail!("Corrupted {} file: malformed line '{}'", PASSWD, line);
        }
        entries.push(PasswdEntry {
            name: parts[0].to_string(),
            uid: parse_id(parts[2], "UID", line, PASSWD)?,
            gid: parse_id(parts[3], "GID", line, PASSWD)?,
            gecos: parts[4].to_string(),
            home: parts[5].to_string(),
            shell: parts[6].to_string(),
        });
    }
    Ok(entries)
}

/// Read all group entries.
pub fn read_group(rootfs: &Path) -> Result<Vec<GroupEntry>> {
    let Some(content) = read_db(rootfs, GROUP)? else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 3 {
            bail!("Corrupted {} file: malformed line '{}'", GROUP, line);
        }
        let members = parts
            .get(3)
            .map(|m| {
                m.split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        entries.push(GroupEntry {
            name: parts[0].to_string(),
            gid: parse_id(parts[2], "GID", line, GROUP)?,
            members,
        });
    }
    Ok(entries)
}

pub fn find_user(rootfs: &Path, name: &str) -> Result<Option<PasswdEntry>> {
    Ok(read_passwd(rootfs)?.into_iter().find(|e| e.name == name))
}

pub fn find_group(rootfs: &Path, name: &str) -> Result<Option<GroupEntry>> {
    Ok(read_group(rootfs)?.into_iter().find(|e| e.name == name))
}

/// Append a line to a database file, keeping it newline-terminated.
fn append_line(rootfs: &Path, relative: &str, line: &str) -> Result<()> {
    let path = rootfs.join(relative);
    let mut content = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line);
    content.push('\n');
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Append to a shadow database only when the base image uses one.
fn append_shadow_line(rootfs: &Path, relative: &str, name: &str, line: &str) -> Result<()> {
    let path = rootfs.join(relative);
    if !path.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.lines().any(|l| l.split(':').next() == Some(name)) {
        return Ok(());
    }
    append_line(rootfs, relative, line)
}

/// Ensure a group `name` with id `gid` exists.
///
/// Existing group with the same name and id: nothing to do. Same name with
/// another id, or the id taken by another group: identity error.
pub fn ensure_group(rootfs: &Path, name: &str, gid: u32) -> Result<()> {
    let groups = read_group(rootfs)?;

    if let Some(existing) = groups.iter().find(|g| g.name == name) {
        if existing.gid == gid {
            return Ok(());
        }
        bail!(ProvisionError::identity(format!(
            "group '{}' already exists in the base image with GID {} (requested {})",
            name, existing.gid, gid
        )));
    }
    if let Some(owner) = groups.iter().find(|g| g.gid == gid) {
        bail!(ProvisionError::identity(format!(
            "GID {} is already used by group '{}' in the base image",
            gid, owner.name
        )));
    }

    append_line(rootfs, GROUP, &format!("{}:x:{}:", name, gid))?;
    append_shadow_line(rootfs, GSHADOW, name, &format!("{}:!::", name))?;
    Ok(())
}

/// Ensure a user exists with exactly this uid and primary gid.
pub fn ensure_user(
    rootfs: &Path,
    name: &str,
    uid: u32,
    gid: u32,
    home: &str,
    shell: &str,
) -> Result<()> {
    let users = read_passwd(rootfs)?;

    if let Some(existing) = users.iter().find(|u| u.name == name) {
        if existing.uid == uid && existing.gid == gid {
            return Ok(());
        }
        bail!(ProvisionError::identity(format!(
            "user '{}' already exists in the base image as {}:{} (requested {}:{})",
            name, existing.uid, existing.gid, uid, gid
        )));
    }
    if let Some(owner) = users.iter().find(|u| u.uid == uid) {
        bail!(ProvisionError::identity(format!(
            "UID {} is already used by user '{}' in the base image",
            uid, owner.name
        )));
    }
    if !read_group(rootfs)?.iter().any(|g| g.gid == gid) {
        bail!("primary group {} for user '{}' does not exist", gid, name);
    }

    append_line(
        rootfs,
        PASSWD,
        &format!("{}:x:{}:{}:{}:{}:{}", name, uid, gid, name, home, shell),
    )?;
    // Locked password, no aging data: login is by sudo/su from root only
    append_shadow_line(rootfs, SHADOW, name, &format!("{}:!::0:99999:7:::", name))?;
    Ok(())
}

/// Add `user` to the supplementary member list of `group`.
///
/// The group must already exist; a missing group is a configuration error
/// because the base image is expected to define it.
pub fn add_to_group(rootfs: &Path, group: &str, user: &str) -> Result<()> {
    let path = rootfs.join(GROUP);
    let content = read_db(rootfs, GROUP)?.unwrap_or_default();

    let mut found = false;
    let mut lines = Vec::new();
    for line in content.lines() {
        let mut parts: Vec<String> = line.split(':').map(str::to_string).collect();
        if parts.len() >= 3 && parts[0] == group {
            found = true;
            if parts.len() < 4 {
                parts.resize(4, String::new());
            }
            let mut members: Vec<&str> = parts[3].split(',').filter(|s| !s.is_empty()).collect();
            if !members.contains(&user) {
                members.push(user);
            }
            parts[3] = members.join(",");
            lines.push(parts.join(":"));
        } else {
            lines.push(line.to_string());
        }
    }

    if !found {
        bail!(ProvisionError::config(format!(
            "group '{}' is not defined by the base image",
            group
        )));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(&path, out).with_context(|| format!("Failed to write {}", path.display()))?;

    add_to_gshadow(rootfs, group, user)
}

fn add_to_gshadow(rootfs: &Path, group: &str, user: &str) -> Result<()> {
    let Some(content) = read_db(rootfs, GSHADOW)? else {
        return Ok(());
    };
    let mut lines = Vec::new();
    for line in content.lines() {
        let mut parts: Vec<String> = line.split(':').map(str::to_string).collect();
        if parts.len() >= 2 && parts[0] == group {
            parts.resize(parts.len().max(4), String::new());
            let mut members: Vec<&str> = parts[3].split(',').filter(|s| !s.is_empty()).collect();
            if !members.contains(&user) {
                members.push(user);
            }
            parts[3] = members.join(",");
            lines.push(parts.join(":"));
        } else {
            lines.push(line.to_string());
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    let path = rootfs.join(GSHADOW);
    fs::write(&path, out).with_context(|| format!("Failed to write {}", path.display()))
}

/// Names of all groups `user` belongs to (primary first).
pub fn groups_of(rootfs: &Path, user: &str) -> Result<Vec<String>> {
    let Some(entry) = find_user(rootfs, user)? else {
        return Ok(Vec::new());
    };
    let groups = read_group(rootfs)?;
    let mut names = Vec::new();
    if let Some(primary) = groups.iter().find(|g| g.gid == entry.gid) {
        names.push(primary.name.clone());
    }
    for g in &groups {
        if g.members.iter().any(|m| m == user) && !names.contains(&g.name) {
            names.push(g.name.clone());
        }
    }
    Ok(names)
}

/// Create the home directory, populate it from `etc/skel` and hand it to
/// the user. Ownership is only applied when running as root.
pub fn create_home(rootfs: &Path, home: &str, uid: u32, gid: u32) -> Result<()> {
    let home_dir = rootfs.join(home.trim_start_matches('/'));
    fs::create_dir_all(&home_dir)
        .with_context(|| format!("Failed to create home {}", home_dir.display()))?;

    let skel = rootfs.join(SKEL);
    if skel.is_dir() {
        for entry in WalkDir::new(&skel).min_depth(1).follow_links(false) {
            let entry = entry?;
            let target = home_dir.join(entry.path().strip_prefix(&skel)?);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                fs::create_dir_all(&target)?;
            } else if file_type.is_symlink() {
                if fs::symlink_metadata(&target).is_err() {
                    std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
                }
            } else if !target.exists() {
                fs::copy(entry.path(), &target)?;
            }
        }
    }

    fs::set_permissions(&home_dir, fs::Permissions::from_mode(HOME_MODE))?;

    if crate::process::is_root() {
        for entry in WalkDir::new(&home_dir).follow_links(false) {
            let entry = entry?;
            std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid)).with_context(|| {
                format!("Failed to chown {}", entry.path().display())
            })?;
        }
    } else {
        log::warn!(
            "not running as root: {} keeps the invoking user's ownership instead of {}:{}",
            home_dir.display(),
            uid,
            gid
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rootfs() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc/skel")).unwrap();
        fs::write(
            dir.path().join(PASSWD),
            "root:x:0:0:root:/root:/bin/bash\nnobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(GROUP),
            "root:x:0:\nplugdev:x:46:\nnogroup:x:65534:\n",
        )
        .unwrap();
        fs::write(dir.path().join(SHADOW), "root:*:19000:0:99999:7:::\n").unwrap();
        fs::write(dir.path().join(GSHADOW), "root:*::\nplugdev:!::\n").unwrap();
        fs::write(dir.path().join("etc/skel/.bashrc"), "# bashrc\n").unwrap();
        dir
    }

    #[test]
    fn test_ensure_group_appends_and_is_idempotent() {
        let root = rootfs();
        ensure_group(root.path(), "dev", 1000).unwrap();
        ensure_group(root.path(), "dev", 1000).unwrap();

        let groups = read_group(root.path()).unwrap();
        assert_eq!(groups.iter().filter(|g| g.name == "dev").count(), 1);
        let gshadow = fs::read_to_string(root.path().join(GSHADOW)).unwrap();
        assert!(gshadow.contains("dev:!::"));
    }

    #[test]
    fn test_ensure_group_gid_collision() {
        let root = rootfs();
        let err = ensure_group(root.path(), "dev", 46).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Identity(_))
        ));
    }

    #[test]
    fn test_ensure_user_and_uid_collision() {
        let root = rootfs();
        ensure_group(root.path(), "dev", 1000).unwrap();
        ensure_user(root.path(), "dev", 1000, 1000, "/home/dev", "/bin/bash").unwrap();

        let user = find_user(root.path(), "dev").unwrap().unwrap();
        assert_eq!((user.uid, user.gid), (1000, 1000));
        assert_eq!(user.home, "/home/dev");

        let err = ensure_user(root.path(), "other", 1000, 1000, "/home/other", "/bin/bash")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Identity(_))
        ));

        let shadow = fs::read_to_string(root.path().join(SHADOW)).unwrap();
        assert!(shadow.contains("dev:!::0:99999:7:::"));
    }

    #[test]
    fn test_ensure_user_requires_primary_group() {
        let root = rootfs();
        assert!(ensure_user(root.path(), "dev", 1000, 1000, "/home/dev", "/bin/bash").is_err());
    }

    #[test]
    fn test_add_to_group_members() {
        let root = rootfs();
        ensure_group(root.path(), "dev", 1000).unwrap();
        ensure_user(root.path(), "dev", 1000, 1000, "/home/dev", "/bin/bash").unwrap();
        add_to_group(root.path(), "plugdev", "dev").unwrap();
        add_to_group(root.path(), "plugdev", "dev").unwrap();

        let plugdev = find_group(root.path(), "plugdev").unwrap().unwrap();
        assert_eq!(plugdev.members, vec!["dev".to_string()]);
        assert_eq!(groups_of(root.path(), "dev").unwrap(), vec!["dev", "plugdev"]);

        let gshadow = fs::read_to_string(root.path().join(GSHADOW)).unwrap();
        assert!(gshadow.contains("plugdev:!::dev"));
    }

    #[test]
    fn test_add_to_missing_group_is_config_error() {
        let root = rootfs();
        let err = add_to_group(root.path(), "usb", "dev").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_corrupted_passwd_is_error() {
        let root = rootfs();
        fs::write(root.path().join(PASSWD), "root:x:zero:0:root:/root:/bin/bash\n").unwrap();
        assert!(read_passwd(root.path()).is_err());
    }

    #[test]
    fn test_create_home_copies_skel() {
        let root = rootfs();
        create_home(root.path(), "/home/dev", 1000, 1000).unwrap();
        let home = root.path().join("home/dev");
        assert!(home.join(".bashrc").exists());
        let mode = fs::metadata(&home).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, HOME_MODE);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("user", "dev").is_ok());
        assert!(validate_name("user", "first.last").is_ok());
        assert!(validate_name("user", "Dev").is_err());
        assert!(validate_name("user", "1dev").is_err());
        assert!(matches!(
            validate_name("user", "root"),
            Err(ProvisionError::Identity(_))
        ));
    }
}
