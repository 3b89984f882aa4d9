//! Listener configuration

use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::amqp::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::{Error, Result};

/// Default certificate directory of the listener.
pub const DEFAULT_LISTENER_CERT_DIR: &str = "/opt/none-authservice/cert";

/// Environment variables the listener reads, lowercased for figment.
const ENV_KEYS: [&str; 2] = ["listenport", "cert_dir"];

/// Authentication listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listening port (`LISTENPORT`). Required, no default.
    #[serde(rename = "listenport", alias = "port")]
    pub port: Option<u16>,
    /// Bind address
    pub host: String,
    /// Directory holding `tls.crt` and `tls.key` (`CERT_DIR`)
    pub cert_dir: PathBuf,
    /// How long to wait for the peer's `close` after the gate closes
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
    /// Largest inbound frame accepted
    pub max_frame_size: u32,
    /// Container id sent in `open`; random when unset
    pub container_id: Option<String>,
    /// Properties present on every local `open` before the identity stamp
    pub open_properties: BTreeMap<String, String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: "0.0.0.0".to_string(),
            cert_dir: PathBuf::from(DEFAULT_LISTENER_CERT_DIR),
            close_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            container_id: None,
            open_properties: BTreeMap::new(),
        }
    }
}

impl ListenerConfig {
    /// Load configuration from an optional YAML file, then `LISTENPORT` and
    /// `CERT_DIR` from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::raw().only(&ENV_KEYS));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if config.cert_dir.as_os_str().is_empty() {
            config.cert_dir = PathBuf::from(DEFAULT_LISTENER_CERT_DIR);
        }

        Ok(config)
    }

    /// The configured port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no port was configured.
    pub fn port(&self) -> Result<u16> {
        self.port
            .ok_or_else(|| Error::Config("LISTENPORT is required".to_string()))
    }

    /// Server certificate path
    #[must_use]
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("tls.crt")
    }

    /// Server private key path
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("tls.key")
    }
}

/// Duration serialization helpers
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration as milliseconds (e.g., "5000ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn port_is_required() {
        let err = ListenerConfig::default().port().unwrap_err();
        assert!(err.to_string().contains("LISTENPORT"));
        assert!(err.is_fatal());
    }

    #[test]
    fn env_supplies_port_and_cert_dir() {
        Jail::expect_with(|jail| {
            jail.set_env("LISTENPORT", "5671");
            jail.set_env("CERT_DIR", "/run/authservice");
            let config = ListenerConfig::load(None).unwrap();
            assert_eq!(config.port().unwrap(), 5671);
            assert_eq!(config.key_path(), PathBuf::from("/run/authservice/tls.key"));
            assert_eq!(config.cert_path(), PathBuf::from("/run/authservice/tls.crt"));
            Ok(())
        });
    }

    #[test]
    fn cert_dir_defaults_to_opt() {
        Jail::expect_with(|_jail| {
            let config = ListenerConfig::load(None).unwrap();
            assert_eq!(config.cert_dir, PathBuf::from("/opt/none-authservice/cert"));
            assert!(config.port.is_none());
            assert_eq!(config.close_timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn yaml_file_is_layered_under_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "listener.yaml",
                r"
listenport: 5672
host: 127.0.0.1
close_timeout: 250ms
open_properties:
  product: none-authservice
",
            )?;
            jail.set_env("LISTENPORT", "5673");
            let config = ListenerConfig::load(Some(Path::new("listener.yaml"))).unwrap();
            assert_eq!(config.port, Some(5673));
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.close_timeout, Duration::from_millis(250));
            assert_eq!(
                config.open_properties.get("product").map(String::as_str),
                Some("none-authservice")
            );
            Ok(())
        });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = ListenerConfig::load(Some(Path::new("/nonexistent/listener.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn humantime_parses_units() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| {
            serde_json::from_value::<Wrapper>(serde_json::json!({ "d": s }))
                .unwrap()
                .d
        };
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("100ms"), Duration::from_millis(100));
        assert_eq!(parse("7"), Duration::from_secs(7));
    }
}
