//! Configuration loader - JSON/YAML settings file + .env overrides

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing InfluxDB setting '{0}'")]
    Missing(&'static str),
}

/// Main configuration loaded from .conf.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub influxdb: InfluxDbConfig,
}

/// Connection parameters for the InfluxDB v2 HTTP API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    /// Bucket name, e.g. `hass/autogen`
    pub database: String,
}

/// Overrides loaded from .env / the process environment
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub url: Option<String>,
    pub token: Option<String>,
    pub org: Option<String>,
    pub database: Option<String>,
}

impl Config {
    /// Load configuration from a JSON or YAML file, picked by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment overrides, then check every setting is present.
    pub fn with_secrets(mut self, secrets: Secrets) -> Result<Self, ConfigError> {
        let db = &mut self.influxdb;
        if let Some(url) = secrets.url {
            db.url = url;
        }
        if let Some(token) = secrets.token {
            db.token = token;
        }
        if let Some(org) = secrets.org {
            db.org = org;
        }
        if let Some(database) = secrets.database {
            db.database = database;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.influxdb;
        for (name, value) in [
            ("url", &db.url),
            ("token", &db.token),
            ("org", &db.org),
            ("database", &db.database),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }
}

impl Secrets {
    /// Load overrides from .env, then the process environment
    pub fn load() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment overrides from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Secrets {
            url: get("INFLUXDB_URL"),
            token: get("INFLUXDB_TOKEN"),
            org: get("INFLUXDB_ORG"),
            database: get("INFLUXDB_DATABASE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const JSON: &str = r#"{
        "influxdb": {
            "token": "secret",
            "url": "http://localhost:8086",
            "org": "home",
            "database": "hass/autogen"
        }
    }"#;

    #[test]
    fn test_load_json() {
        let config = Config::from_json(JSON).unwrap();
        assert_eq!(config.influxdb.url, "http://localhost:8086");
        assert_eq!(config.influxdb.database, "hass/autogen");
    }

    #[test]
    fn test_load_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        std::fs::write(
            &path,
            "influxdb:\n  url: http://db:8086\n  token: t\n  org: o\n  database: hass\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.influxdb.url, "http://db:8086");
        assert_eq!(config.influxdb.database, "hass");
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::load("/nonexistent/.conf.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_json_is_error() {
        let err = Config::from_json("{\"influxdb\": {\"url\": 3}}").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> =
            [("INFLUXDB_TOKEN", "from-env"), ("INFLUXDB_ORG", "")].into_iter().collect();
        let secrets = Secrets::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(secrets.org.is_none());

        let config = Config::from_json(JSON).unwrap().with_secrets(secrets).unwrap();
        assert_eq!(config.influxdb.token, "from-env");
        assert_eq!(config.influxdb.org, "home");
    }

    #[test]
    fn test_empty_setting_rejected() {
        let mut config = Config::from_json(JSON).unwrap();
        config.influxdb.token = "  ".to_string();
        let err = config.with_secrets(Secrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("token")));
    }
}
