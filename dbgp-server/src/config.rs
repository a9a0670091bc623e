// Command line and configuration file handling
//
// The JSON file provides the base SessionConfig; flags given on the command
// line take precedence over it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dbgp_engine::SessionConfig;

#[derive(Debug, Parser)]
#[command(name = "dbgp-server", version, about = "Run a script under a DBGP debugger session")]
pub struct Cli {
    /// IDE host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// IDE port to connect to
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Session key announced to the IDE
    #[arg(long)]
    pub idekey: Option<String>,

    /// Levels of eager child expansion in property responses
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// JSON file with session settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Script to run
    pub script: PathBuf,
}

impl Cli {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => SessionConfig::default(),
        };

        if let Some(idekey) = &self.idekey {
            config.idekey = idekey.clone();
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<SessionConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))
}
