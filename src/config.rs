use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::location::Position;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Simulated match discovery. Unset fields fall back to defaults so a
/// layer only overrides what it names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Chance of a hit per discovery tick
    #[serde(default)]
    pub probability: Option<f64>,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 45;
const DEFAULT_DISCOVERY_PROBABILITY: f64 = 0.1;
const DEFAULT_LOCATION_INTERVAL_SECS: u64 = 30;

impl DiscoveryConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.unwrap_or(DEFAULT_DISCOVERY_INTERVAL_SECS)
    }

    pub fn probability(&self) -> f64 {
        self.probability.unwrap_or(DEFAULT_DISCOVERY_PROBABILITY)
    }

    fn merge(&mut self, other: DiscoveryConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.interval_secs.is_some() {
            self.interval_secs = other.interval_secs;
        }
        if other.probability.is_some() {
            self.probability = other.probability;
        }
        if other.seed.is_some() {
            self.seed = other.seed;
        }
    }
}

/// Location sampling while a session is open
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Fixed coordinates; without them location behaves as denied
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl LocationConfig {
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.unwrap_or(DEFAULT_LOCATION_INTERVAL_SECS)
    }

    pub fn fixed_position(&self) -> Option<Position> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Position {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    fn merge(&mut self, other: LocationConfig) {
        if other.interval_secs.is_some() {
            self.interval_secs = other.interval_secs;
        }
        if other.latitude.is_some() {
            self.latitude = other.latitude;
        }
        if other.longitude.is_some() {
            self.longitude = other.longitude;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl JournalConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Where the store and journal live (default: ~/.opento/data)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.opento/config.local.toml) > project (.opento/config.toml) > user (~/.opento/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".opento").join("config.toml");
            if user_config.exists() {
                let user = Self::load_from(&user_config)?;
                config.merge(user);
            }
        }

        let project_config = Path::new(".opento").join("config.toml");
        if project_config.exists() {
            let project = Self::load_from(&project_config)?;
            config.merge(project);
        }

        // Should be gitignored
        let local_config = Path::new(".opento").join("config.local.toml");
        if local_config.exists() {
            let local = Self::load_from(&local_config)?;
            config.merge(local);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority)
    /// Every field is overridden only if set in other
    pub fn merge(&mut self, other: Config) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        self.discovery.merge(other.discovery);
        self.location.merge(other.location);
        if other.journal.enabled.is_some() {
            self.journal.enabled = other.journal.enabled;
        }
    }

    /// Resolve the data directory, falling back to ~/.opento/data
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opento")
            .join("data")
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let probability = self.discovery.probability();
        if !(0.0..=1.0).contains(&probability) {
            errors.push(ValidationError {
                field: "discovery.probability".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", probability),
            });
        }

        if self.discovery.interval_secs() == 0 {
            errors.push(ValidationError {
                field: "discovery.interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.location.interval_secs() == 0 {
            errors.push(ValidationError {
                field: "location.interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            errors.push(ValidationError {
                field: "location".to_string(),
                message: "latitude and longitude must be set together".to_string(),
            });
        }

        if let Some(lat) = self.location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                errors.push(ValidationError {
                    field: "location.latitude".to_string(),
                    message: format!("Must be between -90 and 90, got {}", lat),
                });
            }
        }

        if let Some(lon) = self.location.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                errors.push(ValidationError {
                    field: "location.longitude".to_string(),
                    message: format!("Must be between -180 and 180, got {}", lon),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.discovery.enabled());
        assert_eq!(config.discovery.interval_secs(), 45);
        assert_eq!(config.discovery.probability(), 0.1);
        assert_eq!(config.location.interval_secs(), 30);
        assert!(config.journal.enabled());
        assert!(config.location.fixed_position().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
data_dir = "/tmp/opento"

[discovery]
probability = 0.5
seed = 7

[location]
latitude = 52.52
longitude = 13.40
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/opento")));
        assert_eq!(config.discovery.interval_secs(), 45);
        assert_eq!(config.discovery.probability(), 0.5);
        assert_eq!(config.discovery.seed, Some(7));
        assert_eq!(config.resolve_data_dir(), PathBuf::from("/tmp/opento"));
        let position = config.location.fixed_position().unwrap();
        assert_eq!(position.latitude, 52.52);
    }

    #[test]
    fn test_load_from_file_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[journal]\nenabled = false\n").unwrap();

        let mut config = Config {
            data_dir: Some(PathBuf::from("/data")),
            ..Config::default()
        };
        config.merge(Config::load_from(&path).unwrap());
        assert!(!config.journal.enabled());
        // Unset data_dir does not clobber
        assert_eq!(config.data_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_merge_keeps_fields_a_layer_does_not_set() {
        let user: Config = toml::from_str(
            "[discovery]\nenabled = false\nseed = 7\n\n[location]\nlatitude = 1.0\nlongitude = 2.0\n",
        )
        .unwrap();
        let project: Config = toml::from_str("data_dir = \"/tmp/x\"\n").unwrap();
        let local: Config = toml::from_str("[discovery]\ninterval_secs = 10\n").unwrap();

        let mut config = Config::default();
        config.merge(user);
        config.merge(project);
        config.merge(local);

        assert!(!config.discovery.enabled());
        assert_eq!(config.discovery.seed, Some(7));
        assert_eq!(config.discovery.interval_secs(), 10);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(config.location.fixed_position().is_some());
        assert!(config.journal.enabled());
    }

    #[test]
    fn test_validate_invalid_probability() {
        let mut config = Config::default();
        config.discovery.probability = Some(1.5);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.contains("probability"));
        assert!(errors[0].message.contains("between 0.0 and 1.0"));
    }

    #[test]
    fn test_validate_half_location() {
        let mut config = Config::default();
        config.location.latitude = Some(95.0);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "location"));
        assert!(errors.iter().any(|e| e.field == "location.latitude"));
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = Config::default();
        config.discovery.interval_secs = Some(0);
        config.location.interval_secs = Some(0);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
