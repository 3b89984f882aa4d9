//! Authentication listener.
//!
//! Accepts TCP connections, terminates TLS with the certificate from
//! `CERT_DIR`, and runs each connection in its own task through
//! [`connection::drive`]. The [`ConnectionEventHandler`] decides what the
//! gate's `open` carries; [`IdentityStamp`] is the one the binary uses.

pub mod connection;
pub mod handler;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use connection::{Connection, ConnectionSetup, ConnectionState};
pub use handler::{
    ANONYMOUS_SUBJECT, AUTHENTICATED_IDENTITY, AuthenticatedIdentity, ConnectionEventHandler,
    GROUPS, IdentityStamp, MANAGE_GROUP,
};

use crate::amqp::{Fields, Value};
use crate::config::ListenerConfig;
use crate::sasl::SaslServer;
use crate::tls::listener_tls_config;
use crate::{Error, Result};

/// A bound listener, ready to serve.
pub struct Listener<H> {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    setup: ConnectionSetup,
    handler: Arc<H>,
}

impl<H: ConnectionEventHandler> Listener<H> {
    /// Load `tls.crt` / `tls.key` from the configured certificate directory
    /// and bind `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the port is missing, the TLS material
    /// cannot be loaded, or the address cannot be bound.
    pub async fn bind(config: &ListenerConfig, handler: H) -> Result<Self> {
        let port = config.port()?;
        let tls = listener_tls_config(&config.cert_path(), &config.key_path())?;
        Self::bind_with_tls(config, port, tls, handler).await
    }

    /// Bind with an already built rustls configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address cannot be bound.
    pub async fn bind_with_tls(
        config: &ListenerConfig,
        port: u16,
        tls: ServerConfig,
        handler: H,
    ) -> Result<Self> {
        let addr = format!("{}:{port}", config.host);
        let tcp = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("Cannot bind {addr}: {e}")))?;

        let base_properties: Fields = config
            .open_properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::string(v.clone())))
            .collect();

        let setup = ConnectionSetup {
            container_id: config
                .container_id
                .clone()
                .unwrap_or_else(|| format!("none-authservice-{}", Uuid::new_v4())),
            sasl: SaslServer::default(),
            base_properties,
            max_frame_size: config.max_frame_size,
            close_timeout: config.close_timeout,
        };

        Ok(Self {
            tcp,
            acceptor: TlsAcceptor::from(Arc::new(tls)),
            setup,
            handler: Arc::new(handler),
        })
    }

    /// Replace the offered SASL mechanisms.
    #[must_use]
    pub fn with_sasl(mut self, sasl: SaslServer) -> Self {
        self.setup.sasl = sasl;
        self
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Per-connection setup shared by every task.
    #[must_use]
    pub fn setup(&self) -> &ConnectionSetup {
        &self.setup
    }

    /// Accept connections until `shutdown` resolves, then give open
    /// connections `close_timeout` to finish before aborting them.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listening socket itself fails.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            tcp,
            acceptor,
            setup,
            handler,
        } = self;
        let setup = Arc::new(setup);
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;
        let mut backoff = AcceptBackoff::default();

        info!(
            addr = %tcp.local_addr()?,
            mechanisms = ?setup.sasl.mechanisms(),
            "Listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = tcp.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => {
                            backoff.reset();
                            pair
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            warn!(error = %e, retry_in = ?delay, "accept failed");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };
                    next_id += 1;
                    let id = next_id;
                    let acceptor = acceptor.clone();
                    let setup = Arc::clone(&setup);
                    let handler = Arc::clone(&handler);

                    tasks.spawn(async move {
                        let _ = stream.set_nodelay(true);
                        let tls = match acceptor.accept(stream).await {
                            Ok(tls) => tls,
                            Err(e) => {
                                debug!(connection = id, %peer, error = %e, "TLS handshake failed");
                                return;
                            }
                        };
                        match connection::drive(tls, id, Some(peer), &setup, handler.as_ref()).await {
                            Ok(()) => debug!(connection = id, %peer, "connection closed"),
                            Err(e) => debug!(connection = id, %peer, error = %e, "connection dropped"),
                        }
                    });
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        if !tasks.is_empty() {
            info!(open = tasks.len(), "Draining connections");
            let drain = async { while tasks.join_next().await.is_some() {} };
            if tokio::time::timeout(setup.close_timeout, drain).await.is_err() {
                warn!("Connections still open after close timeout, aborting");
                tasks.abort_all();
            }
        }

        info!("Listener stopped");
        Ok(())
    }
}

/// Delay after a failed `accept` (EMFILE and friends): doubles from
/// [`AcceptBackoff::INITIAL`] up to [`AcceptBackoff::MAX`], reset by the
/// next successful accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptBackoff {
    current: Duration,
}

impl AcceptBackoff {
    /// First delay
    pub const INITIAL: Duration = Duration::from_millis(10);
    /// Delay ceiling
    pub const MAX: Duration = Duration::from_secs(1);

    /// Delay to wait now; the following one doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    /// Back to [`AcceptBackoff::INITIAL`].
    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_backoff_doubles_up_to_ceiling() {
        let mut backoff = AcceptBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), AcceptBackoff::MAX);
    }

    #[test]
    fn accept_backoff_resets_after_success() {
        let mut backoff = AcceptBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), AcceptBackoff::INITIAL);
    }
}
