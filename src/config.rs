use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::BatchConfig;
use crate::error::RefeedError;
use crate::logging::LogConfig;
use crate::recompute::EngineConfig;
use crate::targets::{TargetRequest, DEFAULT_MULTIPLIER};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub batch: BatchSettings,
    pub targets: TargetSettings,
}

/// Inputs and execution settings for the batch recompute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub metrics_csv: Option<PathBuf>,
    pub executions_csv: Option<PathBuf>,

    /// Where the snapshot CSV is written
    pub snapshot_csv: PathBuf,

    /// SQLite store receiving score rows, if any
    pub database_path: Option<PathBuf>,

    /// Recompute users in parallel
    pub parallel: bool,

    /// Worker threads; None uses the global pool
    pub num_threads: Option<usize>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            metrics_csv: None,
            executions_csv: None,
            snapshot_csv: PathBuf::from("out/rrs_v2_snapshot.csv"),
            database_path: None,
            parallel: true,
            num_threads: None,
        }
    }
}

impl BatchSettings {
    pub fn batch_config(&self, show_progress: bool) -> BatchConfig {
        BatchConfig {
            parallel: self.parallel,
            num_threads: self.num_threads,
            show_progress,
        }
    }
}

/// Refeed target defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Fraction of TDEE added on a refeed day
    pub multiplier: f64,

    /// Fallback energy expenditure when a day has none
    pub estimated_tdee: Option<f64>,
}

impl Default for TargetSettings {
    fn default() -> Self {
        TargetSettings {
            multiplier: DEFAULT_MULTIPLIER,
            estimated_tdee: None,
        }
    }
}

impl TargetSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            estimated_tdee: self.estimated_tdee,
            ..EngineConfig::default()
        }
    }

    /// Target request for a TDEE and weight, using the configured multiplier
    pub fn request(&self, estimated_tdee: Option<f64>, body_weight_kg: Option<f64>) -> TargetRequest {
        TargetRequest::new(estimated_tdee, body_weight_kg).with_multiplier(self.multiplier)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML configuration: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or the default location, falling back to defaults
    /// when the file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `<config dir>/refeedrs/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("refeedrs").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let multiplier = self.targets.multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(invalid(format!("targets.multiplier must be positive, got {}", multiplier)));
        }
        if let Some(tdee) = self.targets.estimated_tdee {
            if !tdee.is_finite() || tdee <= 0.0 {
                return Err(invalid(format!("targets.estimated_tdee must be positive, got {}", tdee)));
            }
        }
        if self.batch.num_threads == Some(0) {
            return Err(invalid("batch.num_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> anyhow::Error {
    RefeedError::Configuration(reason).into()
}
