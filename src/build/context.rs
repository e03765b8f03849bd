//! Build context shared by every provisioning step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::environment::ROOTFS_DIR;
use crate::image::{BaseImage, OsFamily};
use crate::packages::{backend_for, PackageCache, PackageManager};

/// Paths and collaborators for one provisioning run.
pub struct BuildContext {
    /// Staging directory of the environment being built
    pub env_dir: PathBuf,
    /// Root filesystem inside `env_dir`
    pub rootfs: PathBuf,
    /// Base image reference the rootfs comes from
    pub base: BaseImage,
    /// Explicit rootfs directory or tarball, bypassing the image cache
    pub base_source: Option<PathBuf>,
    /// Host cache directory (exported images, packages)
    pub cache_dir: PathBuf,
    pub cache: PackageCache,
    /// Container engine for exporting images; auto-detected when unset
    pub engine: Option<String>,
    package_manager: Option<Arc<dyn PackageManager>>,
}

impl BuildContext {
    pub fn new(env_dir: &Path, base: BaseImage, cache_dir: &Path) -> Self {
        Self {
            env_dir: env_dir.to_path_buf(),
            rootfs: env_dir.join(ROOTFS_DIR),
            base,
            base_source: None,
            cache_dir: cache_dir.to_path_buf(),
            cache: PackageCache::new(cache_dir),
            engine: None,
            package_manager: None,
        }
    }

    pub fn with_base_source(mut self, source: Option<PathBuf>) -> Self {
        self.base_source = source;
        self
    }

    pub fn with_engine(mut self, engine: Option<String>) -> Self {
        self.engine = engine;
        self
    }

    /// Use `pm` instead of the native backend for the detected family.
    pub fn with_package_manager(mut self, pm: Arc<dyn PackageManager>) -> Self {
        self.package_manager = Some(pm);
        self
    }

    /// Package manager for `family`.
    pub fn package_manager(&self, family: OsFamily) -> Arc<dyn PackageManager> {
        match &self.package_manager {
            Some(pm) => Arc::clone(pm),
            None => backend_for(family),
        }
    }

    /// Build context for tests: the base comes from `source`, packages go
    /// through `pm`.
    #[doc(hidden)]
    pub fn for_testing(
        env_dir: &Path,
        base: BaseImage,
        source: &Path,
        cache_dir: &Path,
        pm: Arc<dyn PackageManager>,
    ) -> Self {
        Self::new(env_dir, base, cache_dir)
            .with_base_source(Some(source.to_path_buf()))
            .with_package_manager(pm)
    }
}
