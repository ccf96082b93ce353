//! Process configuration
//!
//! Values are resolved once at startup, in order of precedence: environment
//! variables, then the optional YAML file named by `FERRY_CONFIG`, then
//! built-in defaults. The result is read-only for the life of the process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::proxy::upstream::UpstreamTarget;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8888";
pub const DEFAULT_TARGET: &str = "http://localhost:8080";

/// Environment variable naming the YAML configuration file
pub const CONFIG_PATH_VAR: &str = "FERRY_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the inbound listener binds
    pub listen_addr: String,
    /// Base URL every request is forwarded to
    pub target: String,
    /// Limit on one upstream exchange; `None` waits indefinitely
    pub upstream_timeout: Option<Duration>,
    /// Attach permissive cross-origin headers to every response
    pub cors: bool,
}

/// On-disk form of [`Config`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub target: Option<String>,
    pub upstream_timeout_secs: Option<u64>,
    pub cors: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            target: DEFAULT_TARGET.to_string(),
            upstream_timeout: None,
            cors: true,
        }
    }
}

impl FileConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid YAML configuration")
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_yaml_str(&contents).with_context(|| format!("In config file {}", path))
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match lookup(CONFIG_PATH_VAR) {
            Some(path) => FileConfig::from_path(&path)?,
            None => FileConfig::default(),
        };

        let mut cfg = Self::default().merge(file);

        if let Some(listen) = lookup("LISTEN") {
            cfg.listen_addr = listen;
        }
        if let Some(target) = lookup("TARGET") {
            cfg.target = target;
        }
        if let Some(secs) = lookup("UPSTREAM_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("UPSTREAM_TIMEOUT_SECS is not a number: {}", secs))?;
            cfg.upstream_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(cors) = lookup("CORS") {
            cfg.cors = parse_bool(&cors)
                .with_context(|| format!("CORS must be true or false, got {}", cors))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay the values present in `file` on top of `self`.
    pub fn merge(mut self, file: FileConfig) -> Self {
        if let Some(listen) = file.listen_addr {
            self.listen_addr = listen;
        }
        if let Some(target) = file.target {
            self.target = target;
        }
        if let Some(secs) = file.upstream_timeout_secs {
            self.upstream_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(cors) = file.cors {
            self.cors = cors;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            anyhow::bail!("listen address must not be empty");
        }
        if self.upstream_timeout == Some(Duration::ZERO) {
            anyhow::bail!("upstream timeout must be greater than zero");
        }
        self.upstream_target()?;
        Ok(())
    }

    /// Parsed form of [`Config::target`].
    pub fn upstream_target(&self) -> Result<UpstreamTarget> {
        Ok(UpstreamTarget::parse(&self.target)?)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
