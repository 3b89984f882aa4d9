//! Transport options for AMQP endpoints.
//!
//! [`build_client_options`] and [`build_server_options`] read the TLS
//! material named by a [`TlsSettings`] and return an immutable
//! [`TransportOptions`]. The two differ only in trust policy:
//!
//! | Side   | `reject_unauthorized` | `request_client_cert` |
//! |--------|-----------------------|-----------------------|
//! | client | `false`               | `false`               |
//! | server | `true`                | `true`                |
//!
//! Clients skip server certificate verification. Servers demand and verify
//! client certificates against the CA bundle.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cert_manager::{crypto_provider, parse_certs, parse_private_key, read_file};
use super::config::TlsSettings;
use crate::{Error, Result};

/// Caller-supplied connection options copied into every [`TransportOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// Host to connect to or bind on
    pub host: Option<String>,
    /// Port to connect to or bind on
    pub port: Option<u16>,
    /// SNI server name; falls back to `host`
    pub servername: Option<String>,
}

impl EndpointOptions {
    /// Options pointing at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            servername: None,
        }
    }
}

/// Transport layer selected by the options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TLS over TCP
    #[default]
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => f.write_str("tls"),
        }
    }
}

/// TLS material and trust policy for one endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportOptions {
    endpoint: EndpointOptions,
    ca: Vec<Vec<u8>>,
    cert: Vec<u8>,
    key: Vec<u8>,
    transport: Transport,
    sasl_external_enabled: bool,
    reject_unauthorized: bool,
    request_client_cert: bool,
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("endpoint", &self.endpoint)
            .field("ca", &format_args!("[{} bundle(s)]", self.ca.len()))
            .field("cert", &format_args!("[{} bytes]", self.cert.len()))
            .field("key", &"[redacted]")
            .field("transport", &self.transport)
            .field("sasl_external_enabled", &self.sasl_external_enabled)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("request_client_cert", &self.request_client_cert)
            .finish()
    }
}

/// Options for an outbound AMQP connection.
///
/// The server certificate is NOT verified (`reject_unauthorized = false`).
///
/// # Errors
///
/// Returns [`Error::Config`] naming the first of the CA, certificate or key
/// files that cannot be read. No options are produced in that case.
pub fn build_client_options(
    base: &EndpointOptions,
    settings: &TlsSettings,
) -> Result<TransportOptions> {
    let paths = settings.resolve_paths();
    let ca = read_file(&paths.ca)?;
    let cert = read_file(&paths.cert)?;
    let key = read_file(&paths.key)?;

    debug!(
        ca = %paths.ca.display(),
        cert = %paths.cert.display(),
        "client transport options built"
    );

    Ok(TransportOptions {
        endpoint: base.clone(),
        ca: vec![ca],
        cert,
        key,
        transport: Transport::Tls,
        sasl_external_enabled: true,
        reject_unauthorized: false,
        request_client_cert: false,
    })
}

/// Options for an inbound AMQP listener: the client options with client
/// certificates requested and verified.
///
/// # Errors
///
/// Same as [`build_client_options`].
pub fn build_server_options(
    base: &EndpointOptions,
    settings: &TlsSettings,
) -> Result<TransportOptions> {
    let client = build_client_options(base, settings)?;
    Ok(TransportOptions {
        request_client_cert: true,
        reject_unauthorized: true,
        ..client
    })
}

impl TransportOptions {
    /// Endpoint options supplied by the caller.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointOptions {
        &self.endpoint
    }

    /// Raw CA bundles.
    #[must_use]
    pub fn ca(&self) -> &[Vec<u8>] {
        &self.ca
    }

    /// Raw certificate bytes.
    #[must_use]
    pub fn cert(&self) -> &[u8] {
        &self.cert
    }

    /// Raw private key bytes.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Transport layer.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Whether SASL EXTERNAL may use the TLS identity.
    #[must_use]
    pub fn sasl_external_enabled(&self) -> bool {
        self.sasl_external_enabled
    }

    /// Whether the peer certificate must verify against the CA.
    #[must_use]
    pub fn reject_unauthorized(&self) -> bool {
        self.reject_unauthorized
    }

    /// Whether the server asks clients for a certificate.
    #[must_use]
    pub fn request_client_cert(&self) -> bool {
        self.request_client_cert
    }

    /// Options with a different endpoint and the same TLS material.
    #[must_use]
    pub fn with_endpoint(&self, endpoint: EndpointOptions) -> Self {
        Self {
            endpoint,
            ..self.clone()
        }
    }

    /// SNI name: `servername`, then `host`, then `localhost`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is not a valid DNS name or IP.
    pub fn server_name(&self) -> Result<ServerName<'static>> {
        let name = self
            .endpoint
            .servername
            .as_deref()
            .or(self.endpoint.host.as_deref())
            .unwrap_or("localhost");
        ServerName::try_from(name.to_string())
            .map_err(|e| Error::Config(format!("Invalid server name '{name}': {e}")))
    }

    /// rustls client configuration. Presents the certificate as a client
    /// certificate; verifies the server only when `reject_unauthorized`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM material cannot be parsed or rustls
    /// rejects it.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let provider = crypto_provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = if self.reject_unauthorized {
            builder.with_root_certificates(self.root_store()?)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        };

        let certs = parse_certs(&self.cert, "certificate")?;
        let key = parse_private_key(&self.key, "private key")?;
        Ok(builder.with_client_auth_cert(certs, key)?)
    }

    /// rustls server configuration. With `request_client_cert`, clients are
    /// asked for a certificate chaining to the CA bundle; with
    /// `reject_unauthorized` as well, clients without one are refused.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM material cannot be parsed, the CA bundle
    /// holds no usable trust anchor, or rustls rejects the key.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let provider = crypto_provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = if self.request_client_cert {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(self.root_store()?), provider);
            let verifier = if self.reject_unauthorized {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            let verifier = verifier
                .build()
                .map_err(|e| Error::Tls(format!("client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        let certs = parse_certs(&self.cert, "certificate")?;
        let key = parse_private_key(&self.key, "private key")?;
        Ok(builder.with_single_cert(certs, key)?)
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for bundle in &self.ca {
            for cert in parse_certs(bundle, "CA bundle")? {
                roots.add(cert)?;
            }
        }
        Ok(roots)
    }
}

/// Server verifier for `reject_unauthorized = false`: any certificate is
/// accepted, handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
