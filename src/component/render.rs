//! Render the provisioning plan as a container build file.
//!
//! Output is a BuildKit `Containerfile`: the package cache becomes a cache
//! mount shared with `sharing=locked`, and the identity pair becomes
//! `ARG UID`/`ARG GID` with the profile's values as defaults.

use super::definitions::provisioning_plan;
use super::Op;
use crate::build::sudoers::{self, SUDOERS_D};
use crate::error::ProvisionError;
use crate::image::OsFamily;
use crate::packages::apt::{APT_INSTALL_OPTS, DOCKER_CLEAN_HOOK};
use crate::packages::dnf::DNF_INSTALL_OPTS;
use crate::packages::PackageSet;
use crate::profile::Profile;

const CONTINUATION: &str = " \\\n    ";

/// Commands of one step, emitted as a single `RUN`.
#[derive(Default)]
struct RunBlock {
    mounts: Vec<String>,
    commands: Vec<String>,
}

impl RunBlock {
    fn flush(&mut self, out: &mut String) {
        if self.commands.is_empty() {
            return;
        }
        out.push_str("RUN ");
        for mount in self.mounts.drain(..) {
            out.push_str(&mount);
            out.push_str(CONTINUATION);
        }
        out.push_str(&self.commands.join(&format!("{}&& ", CONTINUATION)));
        out.push('\n');
        self.commands.clear();
    }
}

fn cache_mount(target: &str) -> String {
    format!("--mount=type=cache,target={},sharing=locked", target)
}

fn install_commands(set: &PackageSet, family: OsFamily, run: &mut RunBlock) {
    let packages = set.install_args(family).join(" ");
    match family {
        OsFamily::Debian => {
            run.mounts.push(cache_mount("/var/cache/apt"));
            run.mounts.push(cache_mount("/var/lib/apt"));
            run.commands.push(format!("rm -f /{}", DOCKER_CLEAN_HOOK));
            run.commands.push("apt-get update".to_string());
            run.commands.push(format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install {} {}",
                APT_INSTALL_OPTS.join(" "),
                packages
            ));
        }
        OsFamily::Redhat => {
            run.mounts.push(cache_mount("/var/cache/dnf"));
            run.commands.push("dnf -y --setopt=keepcache=True makecache".to_string());
            run.commands.push(format!(
                "dnf {} install {}",
                DNF_INSTALL_OPTS.join(" "),
                packages
            ));
        }
    }
}

/// Render `profile` for a base of the given family.
pub fn render_containerfile(profile: &Profile, family: OsFamily) -> Result<String, ProvisionError> {
    profile.validate()?;

    let mut out = String::new();
    out.push_str("# syntax=docker/dockerfile:1\n");
    out.push_str(&format!(
        "# Generated by envforge for {} ({}). Rebuild to change anything below.\n",
        profile.base, family
    ));

    for step in provisioning_plan(profile) {
        out.push_str(&format!("\n# {}\n", step.name));
        let mut run = RunBlock::default();

        for op in &step.ops {
            match op {
                Op::RequirePinnedBase => {}
                Op::AcquireBase => {
                    out.push_str(&format!("FROM {}\n", profile.base));
                    out.push_str(&format!("ARG UID={}\n", profile.identity.uid));
                    out.push_str(&format!("ARG GID={}\n", profile.identity.gid));
                }
                Op::RequireGroup(group) => run.commands.push(format!(
                    "getent group {g} >/dev/null || {{ echo \"base image lacks group {g}\" >&2; exit 1; }}",
                    g = group
                )),
                Op::InstallPackages(set) => install_commands(set, family, &mut run),
                Op::CreateGroup { name, .. } => {
                    run.commands.push(format!("groupadd --gid \"$GID\" {}", name))
                }
                Op::CreateUser {
                    name, home, shell, ..
                } => run.commands.push(format!(
                    "useradd --uid \"$UID\" --gid \"$GID\" --create-home --home-dir {} --shell {} {}",
                    home, shell, name
                )),
                Op::GrantPrivilege(rule) => {
                    let path = format!("/{}/{}", SUDOERS_D, sudoers::dropin_name(&rule.subject));
                    run.commands.push(format!("mkdir -p /{}", SUDOERS_D));
                    run.commands.push(format!("echo '{}' > {}", rule.render(), path));
                    run.commands.push(format!("chmod 0440 {}", path));
                }
                Op::AddToGroup { group, user } => {
                    run.commands.push(format!("usermod -aG {} {}", group, user))
                }
                Op::SetDefaultUser { name, home, .. } => {
                    run.flush(&mut out);
                    out.push_str(&format!("USER {}\n", name));
                    out.push_str(&format!("WORKDIR {}\n", home));
                }
            }
        }
        run.flush(&mut out);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BaseImage;

    fn profile() -> Profile {
        Profile::with_base(BaseImage::parse("debian:12.5-slim").unwrap())
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("'{}' missing from:\n{}", needle, haystack))
    }

    #[test]
    fn test_debian_containerfile() {
        let out = render_containerfile(&profile(), OsFamily::Debian).unwrap();
        assert!(out.starts_with("# syntax=docker/dockerfile:1\n"));
        assert!(out.contains("FROM debian:12.5-slim\n"));
        assert!(out.contains("ARG UID=1000\nARG GID=1000\n"));
        assert!(out.contains("--mount=type=cache,target=/var/cache/apt,sharing=locked"));
        assert!(out.contains("--no-install-recommends"));
        assert!(out.contains("sudo libusb-1.0.0\n"));
        assert!(out.contains("echo 'dev ALL=(ALL:ALL) NOPASSWD: ALL' > /etc/sudoers.d/dev"));
        assert!(out.contains("USER dev\nWORKDIR /home/dev\n"));
        assert!(!out.contains("USER root"));
    }

    #[test]
    fn test_account_commands_in_order() {
        let out = render_containerfile(&profile(), OsFamily::Debian).unwrap();
        let install = position(&out, "apt-get install");
        let groupadd = position(&out, "groupadd --gid \"$GID\" dev");
        let useradd = position(&out, "useradd --uid \"$UID\"");
        let usermod = position(&out, "usermod -aG plugdev dev");
        let user = position(&out, "USER dev");
        assert!(install < groupadd && groupadd < useradd && useradd < usermod && usermod < user);
    }

    #[test]
    fn test_redhat_uses_dnf() {
        let mut p = profile();
        p.base = BaseImage::parse("rockylinux:9.3").unwrap();
        let out = render_containerfile(&p, OsFamily::Redhat).unwrap();
        assert!(out.contains("--setopt=install_weak_deps=False"));
        assert!(out.contains("target=/var/cache/dnf,sharing=locked"));
        assert!(!out.contains("apt-get"));
    }

    #[test]
    fn test_unpinned_base_refused() {
        let mut p = profile();
        p.base = BaseImage::parse("debian").unwrap();
        assert!(matches!(
            render_containerfile(&p, OsFamily::Debian),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_identity_defaults_follow_profile() {
        let mut p = profile();
        p.identity = crate::identity::IdentityPair::new(1234, 2345);
        let out = render_containerfile(&p, OsFamily::Debian).unwrap();
        assert!(out.contains("ARG UID=1234\nARG GID=2345\n"));
    }
}
