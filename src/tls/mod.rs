//! TLS material and transport options.
//!
//! - [`config`]: `CERT_DIR` / `CA_PATH` / `CERT_PATH` / `KEY_PATH` settings
//! - [`paths`]: path resolution
//! - [`options`]: client/server [`TransportOptions`] builders
//! - [`cert_manager`]: PEM loading, listener config, dev certificate issuance

pub mod cert_manager;
pub mod config;
pub mod options;
pub mod paths;

pub use cert_manager::{CertGenerator, listener_tls_config};
pub use config::{DEFAULT_CERT_DIR, TlsSettings};
pub use options::{
    EndpointOptions, Transport, TransportOptions, build_client_options, build_server_options,
};
pub use paths::{TlsPaths, get_paths};
