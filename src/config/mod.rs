// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{FlightError, Result};
use config::{Config, Environment, File};
use std::path::Path;

/// Config file consulted when no `--config` flag is given.
pub const DEFAULT_CONFIG_PATH: &str = "conf/local.toml";

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest, `TIERFLIGHT__POOL__CAPACITY=64`)
    /// 2. Config file
    /// 3. Defaults (lowest)
    ///
    /// An explicitly given path must exist; the default path is optional.
    /// The result is not validated, so that command-line overrides can be
    /// applied first; call [`AppConfig::validate`] afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            .add_source(environment())
            .build()
            .map_err(|e| FlightError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| FlightError::Config(e.to_string()))
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.capacity == 0 {
            return Err(FlightError::Config("pool.capacity must be at least 1".into()));
        }
        if self.pool.worker_threads == 0 {
            return Err(FlightError::Config(
                "pool.worker_threads must be at least 1".into(),
            ));
        }
        if self.cache.local_capacity == 0 {
            return Err(FlightError::Config(
                "cache.local_capacity must be at least 1".into(),
            ));
        }
        if self.cache.window_seconds == 0 {
            return Err(FlightError::Config(
                "cache.window_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// `TIERFLIGHT__SECTION__FIELD` variables; lists are comma separated,
/// e.g. `TIERFLIGHT__LOOKUP__RESPONSE=a.com,b.com`.
fn environment() -> Environment {
    Environment::with_prefix("TIERFLIGHT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("lookup.response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.capacity, 200);
        assert_eq!(config.cache.remote_ttl_seconds, 5);
        assert_eq!(config.run.identity, "123");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pool]\ncapacity = 16\nwait_on_shutdown = false\n\n[cache]\nkey_prefix = \"k:\"\n\n[lookup]\nresponse = [\"abc\"]"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pool.capacity, 16);
        assert!(!config.pool.wait_on_shutdown);
        assert_eq!(config.cache.key_prefix, "k:");
        assert_eq!(config.lookup.response, vec!["abc".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.cache.window_seconds, 1);
    }

    #[test]
    fn test_load_leaves_validation_to_caller() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pool]\ncapacity = 0").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pool.capacity, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_lists_are_comma_separated() {
        let vars = HashMap::from([
            (
                "TIERFLIGHT__LOOKUP__RESPONSE".to_string(),
                "a.com,b.com".to_string(),
            ),
            ("TIERFLIGHT__POOL__CAPACITY".to_string(), "8".to_string()),
        ]);
        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.lookup.response, vec!["a.com".to_string(), "b.com".to_string()]);
        assert_eq!(config.pool.capacity, 8);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/tierflight.toml")));
        assert!(matches!(result, Err(FlightError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = AppConfig::default();
        config.pool.capacity = 0;
        assert!(config.validate().is_err());
    }
}
