use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::p1_reader::DataFormat;

/// Smallest buffer that can hold a binary frame header and its checksum.
pub const MIN_BUFFER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("Unable to parse config: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("No config found, tried {0}")]
    NotFound(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn sensor_multiplier_default() -> f64 { return 1.0 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    pub obis_code: String,
    #[serde(default="sensor_multiplier_default")]
    pub multiplier: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TextSensorConfig {
    pub name: String,
    pub identifier: String,
}

fn min_period_ms_default() -> u32 { return 0 }
fn buffer_size_default() -> usize { return 3072 }
fn secondary_p1_default() -> bool { return false }
fn data_format_default() -> DataFormat { return DataFormat::Ascii }
fn time_stats_info_interval_default() -> u32 { return 4 }
fn loop_interval_ms_default() -> u64 { return 10 }
fn sensors_default() -> Vec<SensorConfig> { return Vec::new() }
fn text_sensors_default() -> Vec<TextSensorConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct P1Config {
    #[serde(default="min_period_ms_default")]
    pub min_period_ms: u32,
    #[serde(default="buffer_size_default")]
    pub buffer_size: usize,
    #[serde(default="secondary_p1_default")]
    pub secondary_p1: bool,
    #[serde(default)]
    pub secondary_path: Option<String>,
    #[serde(default="data_format_default")]
    pub data_format: DataFormat,
    #[serde(default="time_stats_info_interval_default")]
    pub time_stats_info_interval: u32,
    #[serde(default="loop_interval_ms_default")]
    pub loop_interval_ms: u64,
    #[serde(default="sensors_default")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default="text_sensors_default")]
    pub text_sensors: Vec<TextSensorConfig>,
}

impl Default for P1Config {
    fn default() -> Self {
        P1Config {
            min_period_ms: min_period_ms_default(),
            buffer_size: buffer_size_default(),
            secondary_p1: secondary_p1_default(),
            secondary_path: None,
            data_format: data_format_default(),
            time_stats_info_interval: time_stats_info_interval_default(),
            loop_interval_ms: loop_interval_ms_default(),
            sensors: sensors_default(),
            text_sensors: text_sensors_default(),
        }
    }
}

impl P1Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: P1Config = serde_yml::from_str(contents)?;
        c.validate()?;
        Ok(c)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let mut file = File::open(path).map_err(|e| ConfigError::Io(display.clone(), e))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| ConfigError::Io(display.clone(), e))?;

        let c = Self::from_yaml(&contents)?;
        info!("Loaded config {} with {} sensors and {} text sensors", display, c.sensors.len(), c.text_sensors.len());
        Ok(c)
    }

    /// Check $P1_CONFIG, config/p1.yaml and p1.yaml in that order.
    pub fn locate() -> Result<Self, ConfigError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(path) = std::env::var("P1_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from("config/p1.yaml"));
        candidates.push(PathBuf::from("p1.yaml"));

        for candidate in &candidates {
            if candidate.is_file() {
                return Self::load(candidate);
            }
            debug!("No config at {}", candidate.display());
        }

        let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(ConfigError::NotFound(tried.join(", ")))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!("buffer_size must be at least {} bytes, got {}", MIN_BUFFER_SIZE, self.buffer_size)));
        }
        if self.loop_interval_ms == 0 {
            return Err(ConfigError::Invalid("loop_interval_ms must not be 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = P1Config::from_yaml("{}").unwrap();
        assert_eq!(c.min_period_ms, 0);
        assert_eq!(c.buffer_size, 3072);
        assert!(!c.secondary_p1);
        assert_eq!(c.data_format, DataFormat::Ascii);
        assert_eq!(c.time_stats_info_interval, 4);
        assert!(c.sensors.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
min_period_ms: 1000
buffer_size: 2048
secondary_p1: true
data_format: BINARY
sensors:
  - name: energy_t1
    obis_code: "1.8.1"
  - name: power
    obis_code: "1.7.0"
    multiplier: 1000
text_sensors:
  - name: meter_time
    identifier: metertime
"#;
        let c = P1Config::from_yaml(yaml).unwrap();
        assert_eq!(c.min_period_ms, 1000);
        assert_eq!(c.data_format, DataFormat::Binary);
        assert_eq!(c.sensors.len(), 2);
        assert_eq!(c.sensors[0].multiplier, 1.0);
        assert_eq!(c.sensors[1].multiplier, 1000.0);
        assert_eq!(c.text_sensors[0].identifier, "metertime");
    }

    #[test]
    fn test_rejects_small_buffer() {
        let result = P1Config::from_yaml("buffer_size: 4");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let result = P1Config::from_yaml("data_format: SML");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_format: ASCII\nsensors:\n  - name: t1\n    obis_code: \"1.8.1\"").unwrap();
        let c = P1Config::load(file.path()).unwrap();
        assert_eq!(c.sensors[0].name, "t1");
    }

    #[test]
    fn test_load_missing_file() {
        let result = P1Config::load(Path::new("/nonexistent/p1.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_, _))));
    }
}
