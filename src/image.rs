//! Base image references and OS family detection.
//!
//! A reference looks like `[registry/]name[:tag][@sha256:digest]`. Only
//! pinned references are accepted: either a digest, or a tag that names a
//! concrete version. Floating tags such as `latest` move under our feet and
//! break reproducibility.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// Tags that always track a moving target.
pub const FLOATING_TAGS: &[&str] = &[
    "latest", "stable", "testing", "unstable", "sid", "edge", "rolling", "rawhide", "nightly",
    "devel", "current", "lts",
];

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z0-9.-]+(:[0-9]+)?/)?[a-z0-9]+([._-]+[a-z0-9]+)*(/[a-z0-9]+([._-]+[a-z0-9]+)*)*$",
        )
        .expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha(256:[a-f0-9]{64}|512:[a-f0-9]{128})$").expect("static regex"))
}

/// A parsed base image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    /// Repository, including any registry prefix.
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl BaseImage {
    /// Parse a reference string. Syntax errors are configuration errors;
    /// pinning is checked separately by [`BaseImage::require_pinned`].
    pub fn parse(reference: &str) -> Result<Self, ProvisionError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ProvisionError::config("base image reference is empty"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(ProvisionError::config(format!(
                        "invalid digest '{}' in base image reference '{}'",
                        digest, reference
                    )));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' before the last '/' is a registry port, not a tag.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        if !name_re().is_match(name) {
            return Err(ProvisionError::config(format!(
                "invalid image name '{}' in base image reference '{}'",
                name, reference
            )));
        }
        if let Some(tag) = &tag {
            if !tag_re().is_match(tag) {
                return Err(ProvisionError::config(format!(
                    "invalid tag '{}' in base image reference '{}'",
                    tag, reference
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// Parse and require the reference to be pinned.
    pub fn parse_pinned(reference: &str) -> Result<Self, ProvisionError> {
        let image = Self::parse(reference)?;
        image.require_pinned()?;
        Ok(image)
    }

    /// True if the reference identifies one immutable image.
    pub fn is_pinned(&self) -> bool {
        if self.digest.is_some() {
            return true;
        }
        match &self.tag {
            Some(tag) => !is_floating_tag(tag),
            None => false,
        }
    }

    pub fn require_pinned(&self) -> Result<(), ProvisionError> {
        if self.is_pinned() {
            return Ok(());
        }
        let why = match &self.tag {
            None => "no tag given (defaults to 'latest')".to_string(),
            Some(tag) => format!("tag '{}' is floating", tag),
        };
        Err(ProvisionError::config(format!(
            "base image '{}' is not pinned: {}. Use a versioned tag (e.g. debian:12.5-slim) or a digest",
            self, why
        )))
    }

    /// Last path component of the repository, e.g. `debian` for
    /// `docker.io/library/debian`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Filesystem-safe key for cached exports of this image.
    pub fn cache_key(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| match c {
                '/' | ':' | '@' => '_',
                c => c,
            })
            .collect()
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// A tag is floating if it is a well-known moving alias, or carries no
/// version number at all (release codenames like `bookworm` get point
/// releases pushed under the same tag).
pub fn is_floating_tag(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    if FLOATING_TAGS.contains(&lower.as_str()) {
        return true;
    }
    !tag.chars().any(|c| c.is_ascii_digit())
}

/// Distribution families with a supported package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt/dpkg).
    Debian,
    /// Fedora, RHEL, Rocky, Alma (dnf/rpm).
    Redhat,
}

const DEBIAN_IDS: &[&str] = &["debian", "ubuntu", "raspbian", "linuxmint", "pop", "kali"];
const REDHAT_IDS: &[&str] = &[
    "fedora", "rhel", "centos", "rocky", "rockylinux", "almalinux", "ol", "ubi8", "ubi9",
];

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Redhat => "redhat",
        }
    }

    fn from_id(id: &str) -> Option<Self> {
        let id = id.trim().trim_matches('"').to_ascii_lowercase();
        if DEBIAN_IDS.contains(&id.as_str()) {
            Some(OsFamily::Debian)
        } else if REDHAT_IDS.contains(&id.as_str()) || id == "centos-stream" {
            Some(OsFamily::Redhat)
        } else {
            None
        }
    }

    /// Detect from the contents of an `os-release` file (`ID`, then `ID_LIKE`).
    pub fn from_os_release(content: &str) -> Option<Self> {
        let mut id = None;
        let mut id_like = None;
        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "ID" => id = Some(value.trim().trim_matches('"').to_string()),
                    "ID_LIKE" => id_like = Some(value.trim().trim_matches('"').to_string()),
                    _ => {}
                }
            }
        }

        if let Some(family) = id.as_deref().and_then(Self::from_id) {
            return Some(family);
        }
        id_like?.split_whitespace().find_map(Self::from_id)
    }

    /// Guess from the image name alone.
    pub fn from_image(image: &BaseImage) -> Option<Self> {
        Self::from_id(image.short_name())
    }

    /// Detect the family of an extracted rootfs, falling back on the
    /// image name when no `os-release` is present.
    pub fn detect(rootfs: &Path, image: &BaseImage) -> Result<Self, ProvisionError> {
        for candidate in ["etc/os-release", "usr/lib/os-release"] {
            let path = rootfs.join(candidate);
            if let Ok(content) = fs::read_to_string(&path) {
                if let Some(family) = Self::from_os_release(&content) {
                    return Ok(family);
                }
                log::warn!(
                    "{} does not name a supported distribution, guessing from image name",
                    path.display()
                );
                break;
            }
        }

        Self::from_image(image).ok_or_else(|| {
            ProvisionError::config(format!(
                "cannot determine OS family of base image '{}' (supported: Debian and Red Hat families)",
                image
            ))
        })
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIGEST: &str = "sha256:2ad2a14c1a7d0e0b4d1f0a3c1e9c5b8d7f6e5d4c3b2a1908f7e6d5c4b3a29180";

    #[test]
    fn test_parse_name_and_tag() {
        let image = BaseImage::parse("debian:12.5-slim").unwrap();
        assert_eq!(image.name, "debian");
        assert_eq!(image.tag.as_deref(), Some("12.5-slim"));
        assert!(image.digest.is_none());
        assert!(image.is_pinned());
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = BaseImage::parse("localhost:5000/team/ubuntu:22.04").unwrap();
        assert_eq!(image.name, "localhost:5000/team/ubuntu");
        assert_eq!(image.tag.as_deref(), Some("22.04"));
        assert_eq!(image.short_name(), "ubuntu");
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let image = BaseImage::parse("localhost:5000/debian").unwrap();
        assert_eq!(image.name, "localhost:5000/debian");
        assert!(image.tag.is_none());
        assert!(!image.is_pinned());
    }

    #[test]
    fn test_digest_pins_even_floating_tag() {
        let image = BaseImage::parse(&format!("debian:latest@{}", DIGEST)).unwrap();
        assert!(image.is_pinned());
        assert_eq!(image.to_string(), format!("debian:latest@{}", DIGEST));
    }

    #[test]
    fn test_unpinned_references_rejected() {
        for reference in ["debian", "debian:latest", "ubuntu:LATEST", "debian:bookworm", "alpine:edge"] {
            let err = BaseImage::parse_pinned(reference).unwrap_err();
            assert!(
                matches!(err, ProvisionError::Config(_)),
                "{} should be a configuration error, got {:?}",
                reference,
                err
            );
        }
    }

    #[test]
    fn test_malformed_references() {
        assert!(BaseImage::parse("").is_err());
        assert!(BaseImage::parse("Debian:12").is_err());
        assert!(BaseImage::parse("debian:12 slim").is_err());
        assert!(BaseImage::parse("debian@sha256:abc").is_err());
    }

    #[test]
    fn test_cache_key_is_path_safe() {
        let image = BaseImage::parse("docker.io/library/debian:12.5").unwrap();
        assert_eq!(image.cache_key(), "docker.io_library_debian_12.5");
    }

    #[test]
    fn test_os_release_id_like_fallback() {
        let content = "NAME=\"Linux Mint\"\nID=mintish\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(OsFamily::from_os_release(content), Some(OsFamily::Debian));

        let rocky = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(OsFamily::from_os_release(rocky), Some(OsFamily::Redhat));

        assert_eq!(OsFamily::from_os_release("ID=alpine\n"), None);
    }

    #[test]
    fn test_detect_prefers_os_release() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/os-release"), "ID=fedora\n").unwrap();

        let image = BaseImage::parse("debian:12").unwrap();
        assert_eq!(OsFamily::detect(dir.path(), &image).unwrap(), OsFamily::Redhat);
    }

    #[test]
    fn test_detect_falls_back_to_image_name() {
        let dir = TempDir::new().unwrap();
        let image = BaseImage::parse("ubuntu:24.04").unwrap();
        assert_eq!(OsFamily::detect(dir.path(), &image).unwrap(), OsFamily::Debian);

        let unknown = BaseImage::parse("alpine:3.19").unwrap();
        assert!(matches!(
            OsFamily::detect(dir.path(), &unknown),
            Err(ProvisionError::Config(_))
        ));
    }
}
