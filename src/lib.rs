//! none-authservice
//!
//! A permissive SASL/TLS authentication gate for AMQP 1.0 peers, and the
//! TLS transport options every AMQP endpoint of the messaging system uses.
//!
//! # Features
//!
//! - **Listener**: TLS + SASL (`PLAIN`, `ANONYMOUS`) server that accepts any
//!   credentials, stamps `authenticated-identity` and `groups` on its `open`
//!   and closes
//! - **Transport options**: `CERT_DIR` / `CA_PATH` / `CERT_PATH` / `KEY_PATH`
//!   resolution and client/server option builders with distinct trust
//!   policies
//! - **Client**: reads the grant back from a running gate
//! - **Dev certificates**: CA and leaf issuance without openssl
//!
//! Every credential is accepted. Do not put this in front of anything that
//! needs real authentication.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod amqp;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod sasl;
pub mod tls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be initialized.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
