//! Provisioning orchestration.
//!
//! [`provision`] validates the profile, skips work when an up-to-date
//! environment already exists, and otherwise runs the plan in a staging
//! directory that only replaces the previous environment on success.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::definitions::provisioning_plan;
use super::executor::{self, RunState};
use crate::build::context::BuildContext;
use crate::cache::{hash_inputs, needs_rebuild, write_cached_hash, INPUTS_HASH_FILE};
use crate::common::{write_json, BuildLock, StagingDir};
use crate::environment::{ExecutableEnvironment, Manifest, MANIFEST_FILE};
use crate::packages::PackageManager;
use crate::profile::Profile;
use crate::timing::Timer;

/// Where and how to provision.
#[derive(Clone)]
pub struct ProvisionOptions {
    pub output_dir: PathBuf,
    /// Directory name of the environment under `output_dir`
    pub name: String,
    pub cache_dir: PathBuf,
    /// Explicit base rootfs (directory or tarball)
    pub base_source: Option<PathBuf>,
    pub engine: Option<String>,
    /// Rebuild even if the inputs are unchanged
    pub force: bool,
    pub package_manager: Option<Arc<dyn PackageManager>>,
}

impl ProvisionOptions {
    pub fn new(output_dir: PathBuf, name: &str, cache_dir: PathBuf) -> Self {
        Self {
            output_dir,
            name: name.to_string(),
            cache_dir,
            base_source: None,
            engine: None,
            force: false,
            package_manager: None,
        }
    }

    pub fn env_dir(&self) -> PathBuf {
        self.output_dir.join(&self.name)
    }

    /// Profile hash extended with where the base rootfs comes from, so
    /// switching `--rootfs` under the same reference rebuilds.
    pub fn inputs_hash(&self, profile: &Profile) -> String {
        let profile_hash = profile.inputs_hash();
        let source = self
            .base_source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        hash_inputs([
            ("profile", profile_hash.as_str()),
            ("base_source", source.as_str()),
        ])
    }
}

#[derive(Debug)]
pub enum ProvisionOutcome {
    Built(ExecutableEnvironment),
    UpToDate(ExecutableEnvironment),
}

impl ProvisionOutcome {
    pub fn environment(&self) -> &ExecutableEnvironment {
        match self {
            Self::Built(env) | Self::UpToDate(env) => env,
        }
    }

    pub fn was_built(&self) -> bool {
        matches!(self, Self::Built(_))
    }
}

/// Default environment directory name: `<image>-<user>`.
pub fn default_env_name(profile: &Profile) -> String {
    format!("{}-{}", profile.base.short_name(), profile.user.name)
}

/// Provision `profile` into `opts.env_dir()`.
///
/// Configuration is validated before anything is created, so a floating
/// base reference never reaches the package step.
pub fn provision(profile: &Profile, opts: &ProvisionOptions) -> Result<ProvisionOutcome> {
    profile
        .validate()
        .context("Invalid provisioning configuration")?;

    let env_dir = opts.env_dir();
    let _lock = BuildLock::acquire(&opts.output_dir, &opts.name)?;

    let inputs_hash = opts.inputs_hash(profile);
    if !opts.force && !needs_rebuild(&inputs_hash, &env_dir) {
        match ExecutableEnvironment::load(&env_dir) {
            Ok(env) => {
                println!("[SKIP] {} is up to date", env_dir.display());
                return Ok(ProvisionOutcome::UpToDate(env));
            }
            Err(e) => log::warn!("existing environment unreadable, rebuilding: {:#}", e),
        }
    }

    println!("Provisioning {} from {}", env_dir.display(), profile.base);
    let staging = StagingDir::create(&opts.output_dir, &opts.name)?;

    let mut ctx = BuildContext::new(staging.path(), profile.base.clone(), &opts.cache_dir)
        .with_base_source(opts.base_source.clone())
        .with_engine(opts.engine.clone());
    if let Some(pm) = &opts.package_manager {
        ctx = ctx.with_package_manager(Arc::clone(pm));
    }

    let mut state = RunState::default();
    let total = Timer::start("total");
    for step in provisioning_plan(profile) {
        let timer = Timer::start(step.name);
        executor::execute(&ctx, &step, &mut state)?;
        timer.finish();
    }

    let family = state
        .family
        .ok_or_else(|| anyhow!("package step did not determine the OS family"))?;
    let manifest = Manifest {
        base_image: profile.base.to_string(),
        family,
        identity: profile.identity,
        user: profile.provisioned_user(),
        hardware_group: profile.hardware_group.clone(),
        requested: profile.packages.iter().map(ToString::to_string).collect(),
        installed: state.installed,
        resolved: state.resolved,
        inputs_hash: inputs_hash.clone(),
    };
    write_json(staging.path().join(MANIFEST_FILE), &manifest)?;
    write_cached_hash(&staging.path().join(INPUTS_HASH_FILE), &inputs_hash)?;

    let dir = staging.commit(&env_dir)?;
    total.finish();
    println!("Environment ready: {}", dir.display());
    Ok(ProvisionOutcome::Built(ExecutableEnvironment::load(&dir)?))
}
