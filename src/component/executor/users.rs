//! Account handlers: Op::CreateGroup, Op::CreateUser, Op::GrantPrivilege,
//! Op::AddToGroup

use anyhow::{bail, Result};

use crate::build::context::BuildContext;
use crate::build::sudoers::{self, PrivilegeRule};
use crate::build::users;
use crate::error::ProvisionError;

pub fn handle_group(ctx: &BuildContext, name: &str, gid: u32) -> Result<()> {
    users::ensure_group(&ctx.rootfs, name, gid)
}

/// Create the user and its home. The shell must exist in the environment by
/// now, either from the base or from the installed packages.
pub fn handle_user(
    ctx: &BuildContext,
    name: &str,
    uid: u32,
    gid: u32,
    home: &str,
    shell: &str,
) -> Result<()> {
    let shell_path = ctx.rootfs.join(shell.trim_start_matches('/'));
    if std::fs::symlink_metadata(&shell_path).is_err() {
        bail!(ProvisionError::config(format!(
            "shell {} does not exist in the environment",
            shell
        )));
    }
    users::ensure_user(&ctx.rootfs, name, uid, gid, home, shell)?;
    users::create_home(&ctx.rootfs, home, uid, gid)
}

pub fn handle_privilege(ctx: &BuildContext, rule: &PrivilegeRule) -> Result<()> {
    let path = sudoers::install_rule(&ctx.rootfs, rule)?;
    log::info!("installed {}", path.display());
    Ok(())
}

pub fn handle_membership(ctx: &BuildContext, group: &str, user: &str) -> Result<()> {
    users::add_to_group(&ctx.rootfs, group, user)
}

#[cfg(test)]
mod tests {
    use super::super::helpers::*;
    use super::*;
    use crate::error::exit_code_for;

    fn acquired(env: &TestEnv) -> BuildContext {
        let ctx = env.build_context();
        crate::acquire::acquire(&ctx).unwrap();
        ctx
    }

    #[test]
    fn test_user_with_private_group() {
        let env = TestEnv::new();
        let ctx = acquired(&env);

        handle_group(&ctx, "dev", 1000).unwrap();
        handle_user(&ctx, "dev", 1000, 1000, "/home/dev", "/bin/bash").unwrap();

        let user = users::find_user(&ctx.rootfs, "dev").unwrap().unwrap();
        assert_eq!((user.uid, user.gid), (1000, 1000));
        assert!(ctx.rootfs.join("home/dev/.bashrc").exists());
    }

    #[test]
    fn test_ops_are_idempotent() {
        let env = TestEnv::new();
        let ctx = acquired(&env);
        for _ in 0..2 {
            handle_group(&ctx, "dev", 1000).unwrap();
            handle_user(&ctx, "dev", 1000, 1000, "/home/dev", "/bin/bash").unwrap();
            handle_membership(&ctx, "plugdev", "dev").unwrap();
        }
        let passwd = users::read_passwd(&ctx.rootfs).unwrap();
        assert_eq!(passwd.iter().filter(|u| u.uid == 1000).count(), 1);
        assert_eq!(
            users::groups_of(&ctx.rootfs, "dev").unwrap(),
            vec!["dev", "plugdev"]
        );
    }

    #[test]
    fn test_colliding_uid_is_identity_error() {
        let env = TestEnv::new();
        let ctx = acquired(&env);
        handle_group(&ctx, "dev", 1000).unwrap();
        // mock base ships "daemon" with uid 1
        let err = handle_user(&ctx, "dev", 1, 1000, "/home/dev", "/bin/bash").unwrap_err();
        assert_eq!(exit_code_for(&err), 4);
    }

    #[test]
    fn test_missing_shell_is_config_error() {
        let env = TestEnv::new();
        let ctx = acquired(&env);
        handle_group(&ctx, "dev", 1000).unwrap();
        let err = handle_user(&ctx, "dev", 1000, 1000, "/home/dev", "/bin/zsh").unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
        assert!(users::find_user(&ctx.rootfs, "dev").unwrap().is_none());
    }

    #[test]
    fn test_privilege_rule_round_trips() {
        let env = TestEnv::new();
        let ctx = acquired(&env);
        handle_privilege(&ctx, &PrivilegeRule::passwordless("dev")).unwrap();
        let rules = sudoers::read_rules(&ctx.rootfs, "dev").unwrap().unwrap();
        assert!(rules.iter().any(|r| r.grants_passwordless_root("dev")));
    }
}
