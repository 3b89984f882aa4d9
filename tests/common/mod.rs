//! Shared fixtures: a throwaway CERT_DIR and a running gate.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use none_authservice::config::ListenerConfig;
use none_authservice::listener::{IdentityStamp, Listener};
use none_authservice::tls::cert_manager::{CaParams, CertGenerator, LeafCertParams};
use none_authservice::tls::{
    EndpointOptions, TlsSettings, TransportOptions, build_client_options,
};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Write `ca.crt`, `ca.key`, `tls.crt` and `tls.key` for `localhost`.
pub fn write_cert_dir(dir: &Path) {
    let ca = CertGenerator::init_ca(&CaParams {
        cn: "Test CA",
        validity_days: 30,
    })
    .unwrap();
    CertGenerator::write_to_dir(&ca, dir, "ca").unwrap();

    let leaf = CertGenerator::issue_leaf(
        &LeafCertParams {
            cn: "localhost",
            san_dns: vec!["localhost".to_string()],
            validity_days: 30,
        },
        &ca.cert_pem,
        &ca.key_pem,
    )
    .unwrap();
    CertGenerator::write_to_dir(&leaf, dir, "tls").unwrap();
}

/// A fresh certificate directory.
pub fn cert_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_cert_dir(dir.path());
    dir
}

/// Listener config on an ephemeral loopback port.
pub fn listener_config(cert_dir: &Path) -> ListenerConfig {
    ListenerConfig {
        port: Some(0),
        host: "127.0.0.1".to_string(),
        cert_dir: cert_dir.to_path_buf(),
        close_timeout: Duration::from_millis(500),
        ..ListenerConfig::default()
    }
}

/// A gate serving in the background.
pub struct Gate {
    pub addr: SocketAddr,
    pub certs: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<none_authservice::Result<()>>,
}

impl Gate {
    /// Start a gate with the stock identity stamp.
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    /// Start a gate after adjusting its config.
    pub async fn start_with(adjust: impl FnOnce(ListenerConfig) -> ListenerConfig) -> Self {
        let certs = cert_dir();
        let config = adjust(listener_config(certs.path()));
        let listener = Listener::bind(&config, IdentityStamp::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(listener.serve(async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            certs,
            shutdown: Some(tx),
            task,
        }
    }

    /// Client transport options pointing at this gate.
    pub fn client_options(&self) -> TransportOptions {
        build_client_options(
            &EndpointOptions {
                host: Some(self.addr.ip().to_string()),
                port: Some(self.addr.port()),
                servername: Some("localhost".to_string()),
            },
            &TlsSettings::with_cert_dir(self.certs.path()),
        )
        .unwrap()
    }

    /// Signal shutdown and wait for the listener to stop.
    pub async fn stop(mut self) -> none_authservice::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap()
    }
}
