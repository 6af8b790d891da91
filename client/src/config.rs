//! CLI parsing and config-file loading — the "external collaborator"
//! spec.md §1 leaves out of the core, wired up here with `clap` (args)
//! and `toml`+`serde` (the mount file) over `fs_core::config::MountConfig`.

use clap::Parser;
use fs_core::config::MountConfig;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Parser, Debug)]
#[command(name = "client", about = "Mount a flist-described, content-addressed remote filesystem")]
pub struct Cli {
    /// Path to the mount's TOML configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Overrides the mount's configured path, e.g. for one-off testing.
    #[arg(short = 'm', long)]
    pub mountpoint: Option<PathBuf>,

    /// Runs the populate/upload/cleaner cron loops without mounting FUSE.
    /// Useful for store-backed integration tests that only need the
    /// content pipeline, not a kernel mount.
    #[arg(long, default_value_t = false)]
    pub no_mount: bool,
}

/// Loads and validates a `MountConfig` from the path named by `--config`,
/// applying the `--mountpoint` override if given.
pub fn load_mount_config(cli: &Cli) -> Result<MountConfig, ConfigError> {
    let contents = std::fs::read_to_string(&cli.config).map_err(|e| ConfigError::Read {
        path: cli.config.clone(),
        source: e,
    })?;
    let mut cfg: MountConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: cli.config.clone(),
        source: e,
    })?;
    if let Some(mountpoint) = &cli.mountpoint {
        cfg.path = mountpoint.clone();
    }
    Ok(cfg)
}
