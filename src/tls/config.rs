//! TLS material configuration.
//!
//! Every AMQP endpoint resolves its CA, certificate and key from the same
//! environment contract:
//!
//! | Variable    | Default                |
//! |-------------|------------------------|
//! | `CERT_DIR`  | `/etc/enmasse-certs`   |
//! | `CA_PATH`   | `{CERT_DIR}/ca.crt`    |
//! | `CERT_PATH` | `{CERT_DIR}/tls.crt`   |
//! | `KEY_PATH`  | `{CERT_DIR}/tls.key`   |
//!
//! The environment is read once into a [`TlsSettings`] value; everything
//! downstream takes the struct, so tests can inject paths directly.

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default base directory for TLS material.
pub const DEFAULT_CERT_DIR: &str = "/etc/enmasse-certs";

const ENV_KEYS: [&str; 4] = ["cert_dir", "ca_path", "cert_path", "key_path"];

/// Where an endpoint finds its TLS material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Base directory (`CERT_DIR`).
    pub cert_dir: PathBuf,

    /// Explicit CA bundle path (`CA_PATH`).
    pub ca_path: Option<PathBuf>,

    /// Explicit certificate path (`CERT_PATH`).
    pub cert_path: Option<PathBuf>,

    /// Explicit private key path (`KEY_PATH`).
    pub key_path: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from(DEFAULT_CERT_DIR),
            ca_path: None,
            cert_path: None,
            key_path: None,
        }
    }
}

impl TlsSettings {
    /// Settings rooted at `cert_dir` with no per-file overrides.
    pub fn with_cert_dir(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            ..Self::default()
        }
    }

    /// Read `CERT_DIR`, `CA_PATH`, `CERT_PATH` and `KEY_PATH` from the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default())).merge(Env::raw().only(&ENV_KEYS)),
        )
    }

    /// Extract settings from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(settings.normalized())
    }

    /// Empty values count as unset.
    fn normalized(mut self) -> Self {
        if self.cert_dir.as_os_str().is_empty() {
            self.cert_dir = PathBuf::from(DEFAULT_CERT_DIR);
        }
        for path in [&mut self.ca_path, &mut self.cert_path, &mut self.key_path] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                *path = None;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_to_enmasse_cert_dir() {
        let settings = TlsSettings::default();
        assert_eq!(settings.cert_dir, PathBuf::from("/etc/enmasse-certs"));
        assert!(settings.ca_path.is_none());
    }

    #[test]
    fn from_env_reads_unprefixed_variables() {
        Jail::expect_with(|jail| {
            jail.set_env("CERT_DIR", "/run/certs");
            jail.set_env("KEY_PATH", "/secret/key.pem");
            let settings = TlsSettings::from_env().unwrap();
            assert_eq!(settings.cert_dir, PathBuf::from("/run/certs"));
            assert_eq!(settings.key_path, Some(PathBuf::from("/secret/key.pem")));
            assert!(settings.cert_path.is_none());
            Ok(())
        });
    }

    #[test]
    fn from_env_without_variables_uses_defaults() {
        Jail::expect_with(|_jail| {
            assert_eq!(TlsSettings::from_env().unwrap(), TlsSettings::default());
            Ok(())
        });
    }

    #[test]
    fn empty_values_count_as_unset() {
        Jail::expect_with(|jail| {
            jail.set_env("CERT_DIR", "");
            jail.set_env("CA_PATH", "");
            let settings = TlsSettings::from_env().unwrap();
            assert_eq!(settings, TlsSettings::default());
            Ok(())
        });
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("LISTENPORT", "5671");
            jail.set_env("CERT_DIR_EXTRA", "/nope");
            assert_eq!(TlsSettings::from_env().unwrap(), TlsSettings::default());
            Ok(())
        });
    }
}
