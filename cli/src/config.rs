use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "miner-cli.yaml";
pub const DEFAULT_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_CLI_WORKERS: i64 = 255;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// CGMiner line-oriented TCP API
    #[default]
    Cgminer,
    /// Vnish REST API
    Vnish,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Color,
    Json,
    Table,
    Summary,
    Csv,
}

/// Values read from the YAML config file. Every field is optional; flags win.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct FileConfig {
    pub protocol: Option<Protocol>,
    pub ips: Option<Vec<String>>,
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    pub workers: Option<i64>,
    pub output: Option<OutputFormat>,
    pub verbose: Option<bool>,
    pub api_key: Option<String>,
}

/// Flag values as given on the command line, before defaults are applied.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub protocol: Option<Protocol>,
    pub ips: Vec<String>,
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    pub workers: Option<i64>,
    pub output: Option<OutputFormat>,
    pub verbose: bool,
    pub api_key: Option<String>,
}

/// Settings for one invocation, built once and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub protocol: Protocol,
    pub ips: Vec<String>,
    /// `None` selects the protocol client's default port.
    pub port: Option<u16>,
    pub timeout: Duration,
    pub workers: i64,
    pub output: OutputFormat,
    pub verbose: bool,
    pub api_key: Option<String>,
}

impl RunConfig {
    pub fn resolve(flags: Overrides, file: Option<FileConfig>) -> Self {
        let file = file.unwrap_or_default();
        let ips = if flags.ips.is_empty() { file.ips.unwrap_or_default() } else { flags.ips };
        RunConfig {
            protocol: flags.protocol.or(file.protocol).unwrap_or_default(),
            ips,
            port: flags.port.or(file.port),
            timeout: Duration::from_secs(flags.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS)),
            workers: flags.workers.or(file.workers).unwrap_or(DEFAULT_CLI_WORKERS),
            output: flags.output.or(file.output).unwrap_or_default(),
            verbose: flags.verbose || file.verbose.unwrap_or(false),
            api_key: flags.api_key.or(file.api_key),
        }
    }
}

/// Load the config file. An explicit path must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags_or_file() {
        let cfg = RunConfig::resolve(Overrides::default(), None);
        assert_eq!(cfg.protocol, Protocol::Cgminer);
        assert_eq!(cfg.timeout, Duration::from_secs(2));
        assert_eq!(cfg.workers, 255);
        assert_eq!(cfg.output, OutputFormat::Color);
        assert_eq!(cfg.port, None);
        assert!(!cfg.verbose);
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig = serde_yaml::from_str(
            "protocol: vnish\nips: [10.0.0.0/30]\nport: 8080\ntimeout: 5\nworkers: 16\noutput: table\n",
        )
        .unwrap();
        let flags = Overrides { workers: Some(4), ips: vec!["192.168.1.1".into()], ..Default::default() };
        let cfg = RunConfig::resolve(flags, Some(file));
        assert_eq!(cfg.protocol, Protocol::Vnish);
        assert_eq!(cfg.ips, vec!["192.168.1.1"]);
        assert_eq!(cfg.port, Some(8080));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.output, OutputFormat::Table);
    }

    #[test]
    fn file_ips_used_when_no_flag() {
        let file = FileConfig { ips: Some(vec!["10.1.1.1-10.1.1.3".into()]), ..Default::default() };
        let cfg = RunConfig::resolve(Overrides::default(), Some(file));
        assert_eq!(cfg.ips, vec!["10.1.1.1-10.1.1.3"]);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/miner-cli.yaml"))).is_err());
    }
}
