//! envforge - development environment provisioner.
//!
//! Builds an environment from a pinned base image:
//! - Non-root user with the host's UID/GID
//! - Passwordless sudo and USB device access (plugdev)
//! - Packages installed through a shared, locked cache

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use envforge::commands;
use envforge::config::{Config, Overrides};
use envforge::error;
use envforge::identity::IdentityPair;

#[derive(Parser)]
#[command(name = "envforge")]
#[command(about = "Reproducible development environment provisioner")]
#[command(
    after_help = "QUICK START:\n  envforge preflight   Check host tools and configuration\n  envforge provision   Build the environment\n  envforge verify      Check the built environment\n  envforge render      Print the equivalent Containerfile"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding .env and the default output/ (default: current dir)
    #[arg(short = 'C', long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(clap::Args)]
struct OverrideArgs {
    /// Pinned base image (e.g. debian:12.5-slim or name@sha256:...)
    #[arg(long = "base", global = true)]
    base_image: Option<String>,

    /// User ID inside the environment
    #[arg(long, global = true)]
    uid: Option<u32>,

    /// Group ID inside the environment
    #[arg(long, global = true)]
    gid: Option<u32>,

    /// Use the invoking user's UID and GID (explicit --uid/--gid still win)
    #[arg(long, global = true)]
    host_identity: bool,

    /// Name of the non-root user
    #[arg(long = "user", global = true)]
    username: Option<String>,

    /// Package to install, `name` or `name=version` (repeatable)
    #[arg(long = "package", global = true)]
    packages: Vec<String>,

    /// Where environments are written
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

impl OverrideArgs {
    fn into_overrides(self) -> Overrides {
        let (uid, gid) = if self.host_identity {
            let host = IdentityPair::current();
            (self.uid.or(Some(host.uid)), self.gid.or(Some(host.gid)))
        } else {
            (self.uid, self.gid)
        };
        Overrides {
            base_image: self.base_image,
            uid,
            gid,
            username: self.username,
            packages: self.packages,
            output_dir: self.output_dir,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the environment natively
    Provision {
        /// Base rootfs directory or tarball (skips the container engine)
        #[arg(long)]
        rootfs: Option<PathBuf>,
        /// Environment name under the output directory
        #[arg(long)]
        name: Option<String>,
        /// Rebuild even if the inputs are unchanged
        #[arg(long)]
        force: bool,
        /// Skip preflight checks
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Print the equivalent container build file
    Render {
        /// OS family (debian or redhat); guessed from the image name if omitted
        #[arg(long)]
        family: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a provisioned environment against its manifest
    Verify {
        /// Environment directory (default: output/<image>-<user>)
        #[arg(long)]
        env: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run preflight checks
    Preflight {
        /// Fail on warnings too (exit code 1)
        #[arg(long)]
        strict: bool,
        /// Check as if a local --rootfs will be supplied
        #[arg(long)]
        rootfs: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Remove environments and caches (default: environments only)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Show an environment's manifest
    Manifest {
        #[arg(long)]
        env: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Remove provisioned environments
    Outputs,
    /// Remove exported images and cached packages
    Cache,
    /// Remove everything
    All,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let base_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let mut config = Config::load(&base_dir)?;
    config.apply(&cli.overrides.into_overrides());
    log::debug!("configuration: {:?}", config);

    match cli.command {
        Commands::Provision {
            rootfs,
            name,
            force,
            skip_preflight,
        } => {
            commands::cmd_provision(
                &config,
                commands::provision::ProvisionArgs {
                    rootfs,
                    name,
                    force,
                    skip_preflight,
                },
            )?;
        }

        Commands::Render { family, output } => {
            commands::cmd_render(&config, family.as_deref(), output)?;
        }

        Commands::Verify { env, json } => {
            commands::cmd_verify(&config, env, json)?;
        }

        Commands::Preflight { strict, rootfs } => {
            commands::cmd_preflight(&config, rootfs, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config { json } => commands::show::ShowTarget::Config { json },
                ShowTarget::Manifest { env } => commands::show::ShowTarget::Manifest { env },
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None | Some(CleanTarget::Outputs) => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::Cache) => commands::clean::CleanTarget::Cache,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(error::exit_code_for(&e));
    }
}
