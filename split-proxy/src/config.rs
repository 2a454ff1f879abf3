use proxy_storage::config::{Config as StorageConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.storage.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_storage::config::SnapshotStoreType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            storage:
                max_checkpoints: 100
                snapshot:
                    type: filesystem
                    path: /var/lib/split-proxy/proxy.snapshot
                    interval_secs: 600
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.common.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125
            })
        );
        assert_eq!(config.storage.max_checkpoints, Some(100));
        let snapshot = config.storage.snapshot.expect("snapshot config");
        assert_eq!(
            snapshot.store,
            SnapshotStoreType::Filesystem {
                path: "/var/lib/split-proxy/proxy.snapshot".into()
            }
        );
        assert_eq!(snapshot.interval_secs, 600);
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file("{}");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.common.metrics, None);
        assert_eq!(config.common.logging, None);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn invalid_config() {
        let tmp = write_tmp_file("storage:\n    max_checkpoints: 0\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ValidationError(
                ValidationError::InvalidMaxCheckpoints
            ))
        ));

        let tmp = write_tmp_file("storage: [");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
