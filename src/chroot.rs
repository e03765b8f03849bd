//! Running programs inside the environment being provisioned.
//!
//! Package managers have to run with the environment as their root so that
//! maintainer scripts, alternatives and ldconfig act on the right tree. A
//! [`ChrootSession`] mounts `/proc` and `/dev`, provides a working
//! `resolv.conf`, and undoes all of it when dropped.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

const RESOLV_CONF: &str = "etc/resolv.conf";
const RESOLV_BACKUP: &str = "etc/resolv.conf.envforge-orig";

/// Mounts and files set up for running commands under `chroot`.
pub struct ChrootSession {
    root: PathBuf,
    mounted: Vec<PathBuf>,
    resolv: ResolvState,
}

enum ResolvState {
    Untouched,
    /// We created the file; remove it afterwards.
    Created,
    /// The original was moved aside; put it back afterwards.
    Replaced,
}

impl ChrootSession {
    /// Prepare `root` for running commands. Requires root privileges.
    pub fn enter(root: &Path) -> Result<Self> {
        let mut session = Self {
            root: root.to_path_buf(),
            mounted: Vec::new(),
            resolv: ResolvState::Untouched,
        };

        session.mount(&["-t", "proc", "proc"], "proc")?;
        session.mount(&["--bind", "/dev"], "dev")?;
        session.provide_resolv_conf()?;

        Ok(session)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a command that runs `program` inside the chroot.
    pub fn cmd(&self, program: &str) -> Cmd {
        Cmd::new("chroot")
            .arg_path(&self.root)
            .arg(program)
            .env("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
    }

    fn mount(&mut self, args: &[&str], target: &str) -> Result<()> {
        let target = self.root.join(target);
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create mount point {}", target.display()))?;
        Cmd::new("mount")
            .args(args)
            .arg_path(&target)
            .error_msg(format!("Failed to mount {}", target.display()))
            .run()?;
        self.mounted.push(target);
        Ok(())
    }

    fn provide_resolv_conf(&mut self) -> Result<()> {
        let host = Path::new("/etc/resolv.conf");
        if !host.exists() {
            log::warn!("host has no /etc/resolv.conf, package downloads may fail to resolve");
            return Ok(());
        }

        let inner = self.root.join(RESOLV_CONF);
        // symlink_metadata so a dangling systemd-resolved link still counts
        if fs::symlink_metadata(&inner).is_ok() {
            fs::rename(&inner, self.root.join(RESOLV_BACKUP))
                .with_context(|| format!("Failed to move aside {}", inner.display()))?;
            self.resolv = ResolvState::Replaced;
        } else {
            self.resolv = ResolvState::Created;
        }
        fs::copy(host, &inner)
            .with_context(|| format!("Failed to copy resolv.conf into {}", inner.display()))?;
        Ok(())
    }
}

impl Drop for ChrootSession {
    fn drop(&mut self) {
        for target in self.mounted.drain(..).rev() {
            if let Err(e) = Cmd::new("umount").arg_path(&target).run() {
                log::warn!("failed to unmount {}: {:#}", target.display(), e);
            }
        }

        let inner = self.root.join(RESOLV_CONF);
        let result = match self.resolv {
            ResolvState::Untouched => Ok(()),
            ResolvState::Created => fs::remove_file(&inner),
            ResolvState::Replaced => {
                let _ = fs::remove_file(&inner);
                fs::rename(self.root.join(RESOLV_BACKUP), &inner)
            }
        };
        if let Err(e) = result {
            log::warn!("failed to restore {}: {}", inner.display(), e);
        }
    }
}
