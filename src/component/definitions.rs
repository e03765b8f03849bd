//! The provisioning plan for a profile.

use super::{Op, Phase, Step};
use crate::profile::Profile;

/// Steps that turn the profile's base image into the environment.
///
/// Order matters: packages before accounts (the sudo package provides
/// `/etc/sudoers.d`), the primary group before the user, and the default
/// identity last.
pub fn provisioning_plan(profile: &Profile) -> Vec<Step> {
    let user = &profile.user;
    let id = profile.identity;

    vec![
        Step::new(
            "base",
            Phase::Base,
            vec![
                Op::RequirePinnedBase,
                Op::AcquireBase,
                Op::RequireGroup(profile.hardware_group.clone()),
            ],
        ),
        Step::new(
            "packages",
            Phase::Packages,
            vec![Op::InstallPackages(profile.packages.clone())],
        ),
        Step::new(
            "accounts",
            Phase::Accounts,
            vec![
                Op::CreateGroup {
                    name: profile.primary_group().to_string(),
                    gid: id.gid,
                },
                Op::CreateUser {
                    name: user.name.clone(),
                    uid: id.uid,
                    gid: id.gid,
                    home: user.home.clone(),
                    shell: user.shell.clone(),
                },
            ],
        ),
        Step::new(
            "privileges",
            Phase::Privileges,
            vec![Op::GrantPrivilege(profile.privilege_rule())],
        ),
        Step::new(
            "devices",
            Phase::Devices,
            vec![Op::AddToGroup {
                group: profile.hardware_group.clone(),
                user: user.name.clone(),
            }],
        ),
        Step::new(
            "runtime",
            Phase::Runtime,
            vec![Op::SetDefaultUser {
                name: user.name.clone(),
                uid: id.uid,
                gid: id.gid,
                home: user.home.clone(),
                shell: user.shell.clone(),
            }],
        ),
    ]
}
