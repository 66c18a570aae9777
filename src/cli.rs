use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};

use crate::engine::DEFAULT_ROOT;

/// File name of the used-config snapshot when `--used-config` is not given
pub const USED_CONFIG_FILE: &str = "used_config.json";

/// enginekit - run module pipelines described by JSON engine definitions
#[derive(Parser, Debug)]
#[command(name = "enginekit")]
#[command(about = "Runs hierarchical engines of lifecycle-managed modules from a JSON configuration")]
#[command(version)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["write_config", "config"])
))]
pub struct Cli {
    /// Write register.json, defaults/<type>.json and a template config.json
    /// into DIR, then exit
    #[arg(long, value_name = "DIR")]
    pub write_config: Option<PathBuf>,

    /// Validate and run a configuration document
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Where to write the used-config snapshot
    /// (default: used_config.json next to --config)
    #[arg(long, value_name = "FILE", requires = "config")]
    pub used_config: Option<PathBuf>,

    /// Name of the root engine
    #[arg(long, value_name = "NAME", default_value = DEFAULT_ROOT)]
    pub root: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Export schemas, defaults and a template into a directory
    WriteConfig { dir: PathBuf },
    /// Run a configuration document
    Run { config: PathBuf, used_config: PathBuf },
}

impl Cli {
    /// Parse command line arguments, returning clap's error instead of exiting
    pub fn try_parse_args() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    /// Resolve the selected mode and its default paths
    pub fn mode(&self) -> anyhow::Result<Mode> {
        match (&self.config, &self.write_config) {
            (Some(config), _) => {
                let used_config = self
                    .used_config
                    .clone()
                    .unwrap_or_else(|| default_used_config(config));
                Ok(Mode::Run {
                    config: config.clone(),
                    used_config,
                })
            }
            (None, Some(dir)) => Ok(Mode::WriteConfig { dir: dir.clone() }),
            (None, None) => anyhow::bail!("one of --config or --write-config is required"),
        }
    }
}

/// `used_config.json` in the directory holding `config`
pub fn default_used_config(config: &Path) -> PathBuf {
    config
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(USED_CONFIG_FILE)
}
