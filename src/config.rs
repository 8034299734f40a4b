use anyhow::{Context, Result};
use pacebms_lib::transport::{ConnectionConfig, Target};
use serde::Deserialize;
use std::time::Duration;

/// Connection settings read from a YAML file, e.g.
///
/// ```yaml
/// target:
///   type: tcp
///   address: 192.168.1.10:5000
/// timeout: 2s
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    target: Target,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl Config {
    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// `default_timeout` applies when the file does not set one.
    pub fn into_connection_config(self, default_timeout: Duration) -> ConnectionConfig {
        ConnectionConfig::new(self.target, self.timeout.unwrap_or(default_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_tcp_config() {
        let file = write_config(
            "target:\n  type: tcp\n  address: 192.168.102.1:5000\ntimeout: 1s 500ms\n",
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.into_connection_config(Duration::from_secs(2)),
            ConnectionConfig::new(
                Target::Tcp {
                    address: "192.168.102.1:5000".into()
                },
                Duration::from_millis(1500)
            )
        );
    }

    #[test]
    fn serial_config_defaults() {
        let file = write_config("target:\n  type: serial\n  device: /dev/ttyUSB0\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.into_connection_config(Duration::from_secs(2)),
            ConnectionConfig::new(
                Target::Serial {
                    device: "/dev/ttyUSB0".into(),
                    baud_rate: 9600
                },
                Duration::from_secs(2)
            )
        );
    }

    #[test]
    fn missing_target_is_rejected() {
        let file = write_config("timeout: 1s\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(Config::load("/nonexistent/pacebms.yaml").is_err());
    }
}
