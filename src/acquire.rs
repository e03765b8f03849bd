//! Turning a pinned base image reference into a root filesystem.
//!
//! Sources, in order of preference:
//! 1. an explicit rootfs directory or tarball (`--rootfs`)
//! 2. a previously exported image under `<cache>/images/`
//! 3. a fresh export through a container engine, cached as in (2)

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::build::BuildContext;
use crate::common::copy_tree;
use crate::error::ProvisionError;
use crate::image::BaseImage;
use crate::process::{self, Cmd};

/// Engines tried, in order, when none is configured.
pub const ENGINES: &[&str] = &["podman", "docker"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Where a base root filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseSource {
    Directory(PathBuf),
    Archive(PathBuf),
    /// Export through a container engine.
    Engine(String),
}

impl BaseSource {
    /// Decide where the base for `ctx` comes from. Does not fetch anything.
    pub fn resolve(ctx: &BuildContext) -> Result<Self> {
        if let Some(path) = &ctx.base_source {
            if path.is_dir() {
                return Ok(Self::Directory(path.clone()));
            }
            if path.is_file() {
                return Ok(Self::Archive(path.clone()));
            }
            return Err(ProvisionError::config(format!(
                "base rootfs {} does not exist",
                path.display()
            ))
            .into());
        }

        let cached = cached_export_path(&ctx.cache_dir, &ctx.base);
        if cached.is_file() {
            return Ok(Self::Archive(cached));
        }

        let engine = detect_engine(ctx.engine.as_deref())?;
        Ok(Self::Engine(engine))
    }
}

/// Path of the cached export of `base`.
pub fn cached_export_path(cache_dir: &Path, base: &BaseImage) -> PathBuf {
    cache_dir
        .join("images")
        .join(format!("{}.tar", base.cache_key()))
}

/// The configured engine, or the first of [`ENGINES`] on PATH.
pub fn detect_engine(configured: Option<&str>) -> Result<String, ProvisionError> {
    if let Some(engine) = configured {
        if process::exists(engine) {
            return Ok(engine.to_string());
        }
        return Err(ProvisionError::fetch(format!(
            "container engine '{}' not found on PATH",
            engine
        )));
    }
    ENGINES
        .iter()
        .find(|e| process::exists(e))
        .map(|e| e.to_string())
        .ok_or_else(|| {
            ProvisionError::fetch(format!(
                "no base rootfs given and no container engine found (tried {})",
                ENGINES.join(", ")
            ))
        })
}

/// Populate `ctx.rootfs` with the base image.
pub fn acquire(ctx: &BuildContext) -> Result<()> {
    fs::create_dir_all(&ctx.rootfs)
        .with_context(|| format!("Failed to create {}", ctx.rootfs.display()))?;

    match BaseSource::resolve(ctx)? {
        BaseSource::Directory(dir) => {
            println!("  Copying base rootfs from {}...", dir.display());
            let count = copy_tree(&dir, &ctx.rootfs)?;
            log::info!("copied {} entries from {}", count, dir.display());
        }
        BaseSource::Archive(archive) => {
            println!("  Unpacking {}...", archive.display());
            let count = unpack(&archive, &ctx.rootfs)?;
            log::info!("unpacked {} entries from {}", count, archive.display());
        }
        BaseSource::Engine(engine) => {
            let archive = export_image(&engine, &ctx.base, &ctx.cache_dir)?;
            println!("  Unpacking {}...", archive.display());
            unpack(&archive, &ctx.rootfs)?;
        }
    }
    Ok(())
}

fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Unpack a plain or gzip-compressed tarball into `dest`.
///
/// Modes are kept; ownership only when running as root. Device nodes are
/// skipped: `/dev` is bind-mounted from the host whenever it matters.
pub fn unpack(archive: &Path, dest: &Path) -> Result<usize> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let reader: Box<dyn Read> = if is_gzip(archive)? {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_preserve_ownerships(process::is_root());
    tar.set_overwrite(true);

    let mut count = 0;
    let entries = tar
        .entries()
        .map_err(|e| ProvisionError::fetch(format!("{}: {}", archive.display(), e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ProvisionError::fetch(format!("{}: {}", archive.display(), e)))?;
        let kind = entry.header().entry_type();
        if kind.is_character_special() || kind.is_block_special() {
            continue;
        }
        entry.unpack_in(dest).with_context(|| {
            format!(
                "Failed to unpack {} from {}",
                entry.path().map(|p| p.display().to_string()).unwrap_or_default(),
                archive.display()
            )
        })?;
        count += 1;
    }
    Ok(count)
}

/// Export `base` through `engine` into the image cache and return the
/// tarball path.
pub fn export_image(engine: &str, base: &BaseImage, cache_dir: &Path) -> Result<PathBuf> {
    let target = cached_export_path(cache_dir, base);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let partial = target.with_extension("tar.partial");
    let reference = base.to_string();
    let container = format!("envforge-export-{}", std::process::id());

    println!("  Pulling {} with {}...", reference, engine);
    Cmd::new(engine)
        .args(["pull", reference.as_str()])
        .error_msg(format!("Failed to pull {}", reference))
        .run()
        .map_err(|e| ProvisionError::fetch(format!("{:#}", e)))?;

    Cmd::new(engine)
        .args(["create", "--name", container.as_str(), reference.as_str(), "/bin/true"])
        .error_msg(format!("Failed to create export container for {}", reference))
        .run()
        .map_err(|e| ProvisionError::fetch(format!("{:#}", e)))?;

    let exported = Cmd::new(engine)
        .args(["export", "-o"])
        .arg_path(&partial)
        .arg(&container)
        .error_msg(format!("Failed to export {}", reference))
        .run();

    if let Err(e) = Cmd::new(engine).args(["rm", "-f", container.as_str()]).run() {
        log::warn!("failed to remove export container {}: {:#}", container, e);
    }
    if let Err(e) = exported {
        let _ = fs::remove_file(&partial);
        return Err(ProvisionError::fetch(format!("{:#}", e)).into());
    }

    fs::rename(&partial, &target)
        .with_context(|| format!("Failed to move export to {}", target.display()))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_tar(path: &Path, gzip: bool, owner: (u64, u64)) {
        let file = File::create(path).unwrap();
        let writer: Box<dyn std::io::Write> = if gzip {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        let mut builder = tar::Builder::new(writer);
        let data = b"ID=debian\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o640);
        header.set_uid(owner.0);
        header.set_gid(owner.1);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "etc/os-release", &data[..])
            .unwrap();
        builder.into_inner().unwrap().flush().unwrap();
    }

    #[test]
    fn test_unpack_plain_and_gzip() {
        let dir = TempDir::new().unwrap();
        for gzip in [false, true] {
            let archive = dir.path().join(format!("base-{}.tar", gzip));
            sample_tar(&archive, gzip, (0, 0));
            assert_eq!(is_gzip(&archive).unwrap(), gzip);

            let dest = dir.path().join(format!("root-{}", gzip));
            fs::create_dir_all(&dest).unwrap();
            assert_eq!(unpack(&archive, &dest).unwrap(), 1);
            assert_eq!(
                fs::read_to_string(dest.join("etc/os-release")).unwrap(),
                "ID=debian\n"
            );
        }
    }

    #[test]
    fn test_unpack_keeps_ownership_as_root() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("base.tar");
        sample_tar(&archive, false, (1234, 42));
        let dest = dir.path().join("root");
        fs::create_dir_all(&dest).unwrap();
        unpack(&archive, &dest).unwrap();

        let meta = fs::metadata(dest.join("etc/os-release")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        if process::is_root() {
            assert_eq!((meta.uid(), meta.gid()), (1234, 42));
        } else {
            // SAFETY: getuid never fails and touches no memory.
            assert_eq!(meta.uid(), unsafe { libc::getuid() });
        }
    }

    #[test]
    fn test_cached_export_path_is_sanitized() {
        let base = BaseImage::parse("docker.io/library/debian:12.5-slim").unwrap();
        let path = cached_export_path(Path::new("/cache"), &base);
        assert_eq!(path.parent().unwrap(), Path::new("/cache/images"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(!name.contains(':') && !name.contains('/'));
    }

    #[test]
    fn test_resolve_prefers_explicit_source() {
        let dir = TempDir::new().unwrap();
        let base = BaseImage::parse("debian:12.5-slim").unwrap();
        let ctx = BuildContext::new(&dir.path().join("env"), base, dir.path())
            .with_base_source(Some(dir.path().to_path_buf()));
        assert_eq!(
            BaseSource::resolve(&ctx).unwrap(),
            BaseSource::Directory(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_missing_explicit_source_is_config_error() {
        let dir = TempDir::new().unwrap();
        let base = BaseImage::parse("debian:12.5-slim").unwrap();
        let ctx = BuildContext::new(&dir.path().join("env"), base, dir.path())
            .with_base_source(Some(dir.path().join("nope")));
        let err = BaseSource::resolve(&ctx).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn test_missing_engine_is_fetch_error() {
        let err = detect_engine(Some("envforge-no-such-engine")).unwrap_err();
        assert!(matches!(err, ProvisionError::Fetch(_)));
    }
}
