//! TLS material path resolution.

use std::path::PathBuf;

use serde::Serialize;

use super::config::TlsSettings;

/// Resolved CA, certificate and key paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsPaths {
    /// CA bundle
    pub ca: PathBuf,
    /// Endpoint certificate
    pub cert: PathBuf,
    /// Endpoint private key
    pub key: PathBuf,
}

impl TlsSettings {
    /// Resolve the three paths. Each explicit override replaces only its own
    /// field; the rest fall back to `ca.crt`, `tls.crt` and `tls.key` under
    /// `cert_dir`. Recomputed on every call.
    #[must_use]
    pub fn resolve_paths(&self) -> TlsPaths {
        TlsPaths {
            ca: self
                .ca_path
                .clone()
                .unwrap_or_else(|| self.cert_dir.join("ca.crt")),
            cert: self
                .cert_path
                .clone()
                .unwrap_or_else(|| self.cert_dir.join("tls.crt")),
            key: self
                .key_path
                .clone()
                .unwrap_or_else(|| self.cert_dir.join("tls.key")),
        }
    }
}

/// Raw paths for callers that hand them to another library or process
/// instead of reading the files.
#[must_use]
pub fn get_paths(settings: &TlsSettings) -> TlsPaths {
    settings.resolve_paths()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_enmasse_certs() {
        let paths = get_paths(&TlsSettings::default());
        assert_eq!(paths.ca, PathBuf::from("/etc/enmasse-certs/ca.crt"));
        assert_eq!(paths.cert, PathBuf::from("/etc/enmasse-certs/tls.crt"));
        assert_eq!(paths.key, PathBuf::from("/etc/enmasse-certs/tls.key"));
    }

    #[test]
    fn override_touches_only_its_own_field() {
        // GIVEN: only CA_PATH overridden
        let settings = TlsSettings {
            ca_path: Some(PathBuf::from("/trust/bundle.pem")),
            ..TlsSettings::default()
        };
        // WHEN: resolving
        let paths = settings.resolve_paths();
        // THEN: cert and key still come from the directory
        assert_eq!(paths.ca, PathBuf::from("/trust/bundle.pem"));
        assert_eq!(paths.cert, PathBuf::from("/etc/enmasse-certs/tls.crt"));
        assert_eq!(paths.key, PathBuf::from("/etc/enmasse-certs/tls.key"));
    }

    #[test]
    fn custom_cert_dir_moves_all_defaults() {
        let paths = TlsSettings::with_cert_dir("/srv/tls").resolve_paths();
        assert_eq!(paths.ca, PathBuf::from("/srv/tls/ca.crt"));
        assert_eq!(paths.key, PathBuf::from("/srv/tls/tls.key"));
    }

    #[test]
    fn paths_serialize_as_json_object() {
        let json = serde_json::to_value(TlsSettings::default().resolve_paths()).unwrap();
        assert_eq!(json["cert"], "/etc/enmasse-certs/tls.crt");
    }
}
