#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ANALYSIS_FILE: &str = "analysis.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Sweep windows as multiples of the sweep length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default = "default_interlength_factor")]
    pub interlength_factor: usize,
    #[serde(default = "default_extralength_factor")]
    pub extralength_factor: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interlength_factor: default_interlength_factor(),
            extralength_factor: default_extralength_factor(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpeedTuningConfig {
    #[serde(default = "default_binsize")]
    pub binsize: usize,
}

impl Default for SpeedTuningConfig {
    fn default() -> Self {
        Self {
            binsize: default_binsize(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReceptiveFieldConfig {
    #[serde(default)]
    pub mask_off_screen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub speed_tuning: SpeedTuningConfig,
    #[serde(default)]
    pub receptive_field: ReceptiveFieldConfig,
}

impl AnalysisConfig {
    /// Loads `analysis.yaml` from `dir`, falling back to defaults when absent.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = read_yaml_or_default(&dir.as_ref().join(ANALYSIS_FILE))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.interlength_factor == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep.interlength_factor",
                message: "baseline window must span at least one sweep".to_string(),
            });
        }
        if self.speed_tuning.binsize == 0 {
            return Err(ConfigError::Invalid {
                field: "speed_tuning.binsize",
                message: "bins must hold at least one frame".to_string(),
            });
        }
        Ok(())
    }
}

/// Reads `path` as YAML; a file that does not exist yields `T::default()`.
fn read_yaml_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_interlength_factor() -> usize {
    4
}

fn default_extralength_factor() -> usize {
    1
}

fn default_binsize() -> usize {
    800
}
