use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEBIAS_DIR_NAME: &str = ".debias";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_SAMPLES: usize = 2000;
pub const DEFAULT_TUNE: usize = 1000;
pub const DEFAULT_TARGET_ACCEPT: f64 = 0.8;
pub const DEFAULT_CHAINS: usize = 4;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_LEAPFROG_STEPS: usize = 64;
pub const DEFAULT_RHAT_THRESHOLD: f64 = 1.01;
pub const DEFAULT_MIN_ESS: f64 = 100.0;
pub const DEFAULT_BIAS_CORRECTION: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DebiasConfig {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_tune")]
    pub tune: usize,
    #[serde(default = "default_target_accept")]
    pub target_accept: f64,
    #[serde(default = "default_chains")]
    pub chains: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_leapfrog_steps")]
    pub max_leapfrog_steps: usize,
    #[serde(default = "default_rhat_threshold")]
    pub rhat_threshold: f64,
    #[serde(default = "default_min_ess")]
    pub min_ess: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            tune: DEFAULT_TUNE,
            target_accept: DEFAULT_TARGET_ACCEPT,
            chains: DEFAULT_CHAINS,
            seed: DEFAULT_SEED,
            max_leapfrog_steps: DEFAULT_MAX_LEAPFROG_STEPS,
            rhat_threshold: DEFAULT_RHAT_THRESHOLD,
            min_ess: DEFAULT_MIN_ESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_bias_correction")]
    pub bias_correction: bool,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            bias_correction: DEFAULT_BIAS_CORRECTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn debias_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(DEBIAS_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    debias_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<DebiasConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(DebiasConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: DebiasConfig = toml::from_str(&raw)?;
    validate_config(&parsed)?;
    Ok(parsed)
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<DebiasConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(debias_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = DebiasConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &DebiasConfig) -> Result<(), ConfigError> {
    let sampler = &config.sampler;
    if sampler.samples == 0 {
        return Err(ConfigError::Invalid(
            "sampler.samples must be at least 1".to_owned(),
        ));
    }
    if sampler.chains == 0 {
        return Err(ConfigError::Invalid(
            "sampler.chains must be at least 1".to_owned(),
        ));
    }
    if !(sampler.target_accept > 0.0 && sampler.target_accept < 1.0) {
        return Err(ConfigError::Invalid(format!(
            "sampler.target_accept must lie strictly between 0 and 1, got {}",
            sampler.target_accept
        )));
    }
    if sampler.max_leapfrog_steps == 0 {
        return Err(ConfigError::Invalid(
            "sampler.max_leapfrog_steps must be at least 1".to_owned(),
        ));
    }
    if !(sampler.rhat_threshold > 1.0) {
        return Err(ConfigError::Invalid(format!(
            "sampler.rhat_threshold must be greater than 1, got {}",
            sampler.rhat_threshold
        )));
    }
    if !(sampler.min_ess >= 0.0) {
        return Err(ConfigError::Invalid(
            "sampler.min_ess must be non-negative".to_owned(),
        ));
    }
    Ok(())
}

fn default_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_tune() -> usize {
    DEFAULT_TUNE
}

fn default_target_accept() -> f64 {
    DEFAULT_TARGET_ACCEPT
}

fn default_chains() -> usize {
    DEFAULT_CHAINS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_max_leapfrog_steps() -> usize {
    DEFAULT_MAX_LEAPFROG_STEPS
}

fn default_rhat_threshold() -> f64 {
    DEFAULT_RHAT_THRESHOLD
}

fn default_min_ess() -> f64 {
    DEFAULT_MIN_ESS
}

fn default_bias_correction() -> bool {
    DEFAULT_BIAS_CORRECTION
}
