//! Package sets and the package managers that install them.
//!
//! The provisioner never reimplements a package manager. It hands an
//! ordered, deduplicated [`PackageSet`] to the base image's own tool through
//! the [`PackageManager`] trait.

pub mod apt;
pub mod cache;
pub mod dnf;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::image::OsFamily;

pub use apt::Apt;
pub use cache::PackageCache;
pub use dnf::Dnf;

/// Packages every environment gets unless configured otherwise.
pub const DEFAULT_PACKAGES: &[&str] = &["sudo", "libusb-1.0.0"];

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_+.-]*$").expect("static regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.+~:_-]*$").expect("static regex"))
}

/// One requested package, optionally pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageSpec {
    /// Parse `name` or `name=version`.
    pub fn parse(entry: &str) -> Result<Self, ProvisionError> {
        let entry = entry.trim();
        let (name, version) = match entry.split_once('=') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (entry, None),
        };

        if !name_re().is_match(name) {
            return Err(ProvisionError::config(format!(
                "invalid package name '{}'",
                name
            )));
        }
        if let Some(version) = version {
            if !version_re().is_match(version) {
                return Err(ProvisionError::config(format!(
                    "invalid version '{}' for package '{}'",
                    version, name
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    /// Argument form understood by the given family's installer.
    pub fn install_arg(&self, family: OsFamily) -> String {
        match (&self.version, family) {
            (None, _) => self.name.clone(),
            (Some(v), OsFamily::Debian) => format!("{}={}", self.name, v),
            (Some(v), OsFamily::Redhat) => format!("{}-{}", self.name, v),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Ordered set of packages, deduplicated by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSet {
    packages: Vec<PackageSpec>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock set: `sudo` and `libusb-1.0.0`.
    pub fn defaults() -> Self {
        let mut set = Self::new();
        for name in DEFAULT_PACKAGES {
            set.packages.push(PackageSpec {
                name: (*name).to_string(),
                version: None,
            });
        }
        set
    }

    /// Build from entries, keeping first-seen order.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ProvisionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for entry in entries {
            set.insert(PackageSpec::parse(entry.as_ref())?)?;
        }
        Ok(set)
    }

    /// Parse a comma and/or whitespace separated list.
    pub fn parse_list(list: &str) -> Result<Self, ProvisionError> {
        Self::from_entries(
            list.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty()),
        )
    }

    /// Add a package. Returns false if it was already present.
    ///
    /// The same name pinned to two different versions is a configuration
    /// error; an unpinned duplicate of a pinned entry is absorbed.
    pub fn insert(&mut self, spec: PackageSpec) -> Result<bool, ProvisionError> {
        if let Some(existing) = self.packages.iter_mut().find(|p| p.name == spec.name) {
            match (&existing.version, &spec.version) {
                (Some(a), Some(b)) if a != b => {
                    return Err(ProvisionError::config(format!(
                        "package '{}' requested at two versions: {} and {}",
                        spec.name, a, b
                    )));
                }
                (None, Some(_)) => existing.version = spec.version,
                _ => {}
            }
            return Ok(false);
        }
        self.packages.push(spec);
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageSpec> {
        self.packages.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn install_args(&self, family: OsFamily) -> Vec<String> {
        self.packages.iter().map(|p| p.install_arg(family)).collect()
    }
}

impl fmt::Display for PackageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.packages.iter().map(ToString::to_string).collect();
        f.write_str(&entries.join(" "))
    }
}

/// A distribution package manager driven against an environment root.
pub trait PackageManager: Send + Sync {
    fn family(&self) -> OsFamily;

    /// Directories (relative to the root) holding downloaded packages and
    /// index data. These are shared through the [`PackageCache`].
    fn cache_dirs(&self) -> &'static [&'static str];

    /// Refresh the package index.
    fn refresh_index(&self, root: &Path) -> Result<(), ProvisionError>;

    /// Install the set non-interactively, without recommended or suggested
    /// extras.
    fn install(&self, root: &Path, packages: &PackageSet) -> Result<(), ProvisionError>;

    /// Installed packages as `name -> version`.
    fn installed(&self, root: &Path) -> Result<BTreeMap<String, String>, ProvisionError>;
}

/// Native backend for an OS family.
pub fn backend_for(family: OsFamily) -> Arc<dyn PackageManager> {
    match family {
        OsFamily::Debian => Arc::new(Apt),
        OsFamily::Redhat => Arc::new(Dnf),
    }
}

/// Characters that make apt read a package argument as a regular
/// expression over package names.
const APT_PATTERN_CHARS: &[char] = &['.', '?', '+', '*', '|', '[', '^', '$'];

/// Match requested names against the installed set after an install.
///
/// A name is satisfied by an installed package of the same name. On Debian
/// bases apt also treats a name holding pattern characters as an unanchored
/// regex, so `libusb-1.0.0` installs `libusb-1.0-0`. Such a name falls back
/// to the installed packages it matches, preferring ones the install added.
///
/// Returns the names satisfied by a differently named package, or the
/// requested names nothing satisfied.
pub fn resolve_installed(
    family: OsFamily,
    set: &PackageSet,
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, Vec<String>> {
    let mut aliases = BTreeMap::new();
    let mut missing = Vec::new();

    for name in set.names() {
        if after.contains_key(name) {
            continue;
        }
        match apt_pattern_match(family, name, before, after) {
            Some(actual) => {
                aliases.insert(name.to_string(), actual);
            }
            None => missing.push(name.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(aliases)
    } else {
        Err(missing)
    }
}

fn apt_pattern_match(
    family: OsFamily,
    name: &str,
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Option<String> {
    if family != OsFamily::Debian || !name.contains(APT_PATTERN_CHARS) {
        return None;
    }
    let pattern = Regex::new(name).ok()?;
    let mut matches = after.keys().filter(|pkg| pattern.is_match(pkg));
    let added = matches.clone().find(|pkg| !before.contains_key(*pkg));
    added.or_else(|| matches.next()).cloned()
}
