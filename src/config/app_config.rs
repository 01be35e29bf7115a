use serde::Deserialize;

use crate::domain::experiment::{DEFAULT_MINIMUM_SAMPLE_SIZE, DEFAULT_SIGNIFICANCE_LEVEL};
use crate::infrastructure::experiment::DEFAULT_MIN_ARM_IMPRESSIONS;
use crate::infrastructure::services::ExperimentServiceConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub experiments: ExperimentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Prometheus metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Defaults for new experiments and the significance evaluator
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default = "default_minimum_sample_size")]
    pub minimum_sample_size: u64,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    #[serde(default = "default_min_arm_impressions")]
    pub min_arm_impressions: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            minimum_sample_size: default_minimum_sample_size(),
            significance_level: default_significance_level(),
            min_arm_impressions: default_min_arm_impressions(),
        }
    }
}

impl From<&ExperimentsConfig> for ExperimentServiceConfig {
    fn from(config: &ExperimentsConfig) -> Self {
        Self {
            minimum_sample_size: config.minimum_sample_size,
            significance_level: config.significance_level,
            min_arm_impressions: config.min_arm_impressions,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_minimum_sample_size() -> u64 {
    DEFAULT_MINIMUM_SAMPLE_SIZE
}

fn default_significance_level() -> f64 {
    DEFAULT_SIGNIFICANCE_LEVEL
}

fn default_min_arm_impressions() -> u64 {
    DEFAULT_MIN_ARM_IMPRESSIONS
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
