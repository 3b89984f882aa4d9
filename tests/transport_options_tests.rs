//! Transport options tests
//!
//! Covers path resolution from the environment and the trust policy of the
//! client and server option builders.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use figment::Jail;
use pretty_assertions::assert_eq;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use none_authservice::Error;
use none_authservice::tls::cert_manager::{crypto_provider, load_certs};
use none_authservice::tls::{
    EndpointOptions, TlsPaths, TlsSettings, Transport, build_client_options,
    build_server_options, get_paths, listener_tls_config,
};

/// Run one TLS handshake over an in-memory pipe; returns whether each side
/// completed it.
async fn handshake(client: ClientConfig, server: ServerConfig) -> (bool, bool) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let connector = TlsConnector::from(Arc::new(client));
    let acceptor = TlsAcceptor::from(Arc::new(server));
    let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();

    let (client, server) = tokio::join!(
        async move { connector.connect(name, client_io).await },
        async move { acceptor.accept(server_io).await },
    );
    // Both streams stay alive until both sides finish, so neither side sees
    // the pipe close mid-handshake.
    (client.is_ok(), server.is_ok())
}

fn roots_from(dir: &std::path::Path) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&dir.join("ca.crt")).unwrap() {
        roots.add(cert).unwrap();
    }
    roots
}

/// Default CERT_DIR resolves under /etc/enmasse-certs
#[test]
fn test_default_paths() {
    Jail::expect_with(|_jail| {
        let settings = TlsSettings::from_env().unwrap();
        assert_eq!(
            get_paths(&settings),
            TlsPaths {
                ca: PathBuf::from("/etc/enmasse-certs/ca.crt"),
                cert: PathBuf::from("/etc/enmasse-certs/tls.crt"),
                key: PathBuf::from("/etc/enmasse-certs/tls.key"),
            }
        );
        Ok(())
    });
}

/// Each override touches only its own field
#[test]
fn test_individual_overrides() {
    Jail::expect_with(|jail| {
        jail.set_env("CERT_DIR", "/certs");
        jail.set_env("CERT_PATH", "/elsewhere/server.pem");

        let paths = TlsSettings::from_env().unwrap().resolve_paths();

        assert_eq!(paths.ca, PathBuf::from("/certs/ca.crt"));
        assert_eq!(paths.cert, PathBuf::from("/elsewhere/server.pem"));
        assert_eq!(paths.key, PathBuf::from("/certs/tls.key"));
        Ok(())
    });
}

/// Client options trust anything; server options verify clients
#[test]
fn test_client_and_server_trust_policy() {
    let certs = common::cert_dir();
    let settings = TlsSettings::with_cert_dir(certs.path());
    let base = EndpointOptions::new("messaging", 5671);

    let client = build_client_options(&base, &settings).unwrap();
    assert_eq!(client.transport(), Transport::Tls);
    assert!(client.sasl_external_enabled());
    assert!(!client.reject_unauthorized());
    assert!(!client.request_client_cert());

    let server = build_server_options(&base, &settings).unwrap();
    assert!(server.sasl_external_enabled());
    assert!(server.reject_unauthorized());
    assert!(server.request_client_cert());

    assert_eq!(
        client.ca()[0],
        fs::read(certs.path().join("ca.crt")).unwrap()
    );
    assert_eq!(client.key(), server.key());
}

/// Options read from environment-driven settings pick up overridden files
#[test]
fn test_env_override_is_read() {
    let certs = common::cert_dir();
    let alt = tempfile::tempdir().unwrap();
    common::write_cert_dir(alt.path());
    let alt_key = alt.path().join("tls.key");

    Jail::expect_with(|jail| {
        jail.set_env("CERT_DIR", certs.path().display().to_string());
        jail.set_env("KEY_PATH", alt_key.display().to_string());

        let settings = TlsSettings::from_env().unwrap();
        let opts = build_client_options(&EndpointOptions::default(), &settings).unwrap();

        assert_eq!(opts.key(), fs::read(&alt_key).unwrap().as_slice());
        assert_eq!(
            opts.cert(),
            fs::read(certs.path().join("tls.crt")).unwrap().as_slice()
        );
        Ok(())
    });
}

/// A missing file fails both builders and names the file
#[test]
fn test_missing_file_fails_both_builders() {
    let certs = common::cert_dir();
    fs::remove_file(certs.path().join("tls.key")).unwrap();
    let settings = TlsSettings::with_cert_dir(certs.path());
    let base = EndpointOptions::default();

    for result in [
        build_client_options(&base, &settings),
        build_server_options(&base, &settings),
    ] {
        match result {
            Err(Error::Config(message)) => assert!(message.contains("tls.key")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}

/// With the default CERT_DIR absent, the error points at /etc/enmasse-certs
#[test]
fn test_default_cert_dir_missing() {
    let err = build_client_options(&EndpointOptions::default(), &TlsSettings::default())
        .unwrap_err();
    assert!(err.to_string().contains("/etc/enmasse-certs/ca.crt"));
}

/// Builders borrow the base options and leave them untouched
#[test]
fn test_builders_are_pure() {
    let certs = common::cert_dir();
    let settings = TlsSettings::with_cert_dir(certs.path());
    let base = EndpointOptions {
        host: Some("broker".into()),
        port: Some(5672),
        servername: Some("broker.local".into()),
    };
    let before = base.clone();

    let client = build_client_options(&base, &settings).unwrap();
    let server = build_server_options(&base, &settings).unwrap();

    assert_eq!(base, before);
    assert_eq!(client.endpoint(), &before);
    assert_eq!(server.endpoint(), &before);
    assert!(!client.reject_unauthorized());
}

/// Client options connect to a server whose certificate no trusted CA signed
#[tokio::test]
async fn test_client_accepts_server_from_unrelated_ca() {
    let ours = common::cert_dir();
    let theirs = common::cert_dir();
    let server = listener_tls_config(
        &theirs.path().join("tls.crt"),
        &theirs.path().join("tls.key"),
    )
    .unwrap();

    let client = build_client_options(
        &EndpointOptions::new("localhost", 5671),
        &TlsSettings::with_cert_dir(ours.path()),
    )
    .unwrap()
    .client_config()
    .unwrap();

    assert_eq!(handshake(client, server.clone()).await, (true, true));

    // A verifying client with the same CA bundle refuses that server
    let verifying = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots_from(ours.path()))
        .with_no_client_auth();
    let (client_ok, _) = handshake(verifying, server).await;
    assert!(!client_ok);
}

/// Server options refuse a client that presents no certificate
#[tokio::test]
async fn test_server_refuses_client_without_certificate() {
    let certs = common::cert_dir();
    let server = build_server_options(
        &EndpointOptions::new("localhost", 5671),
        &TlsSettings::with_cert_dir(certs.path()),
    )
    .unwrap()
    .server_config()
    .unwrap();

    let anonymous = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots_from(certs.path()))
        .with_no_client_auth();

    let (_, server_ok) = handshake(anonymous, server).await;
    assert!(!server_ok);
}

/// Server options accept a client whose certificate chains to the CA bundle
#[tokio::test]
async fn test_server_accepts_client_signed_by_its_ca() {
    let certs = common::cert_dir();
    let settings = TlsSettings::with_cert_dir(certs.path());
    let base = EndpointOptions::new("localhost", 5671);
    let server = build_server_options(&base, &settings)
        .unwrap()
        .server_config()
        .unwrap();
    let client = build_client_options(&base, &settings)
        .unwrap()
        .client_config()
        .unwrap();

    assert_eq!(handshake(client, server).await, (true, true));
}

/// Server options refuse a client certificate from another CA
#[tokio::test]
async fn test_server_refuses_client_from_unrelated_ca() {
    let ours = common::cert_dir();
    let theirs = common::cert_dir();
    let base = EndpointOptions::new("localhost", 5671);
    let server = build_server_options(&base, &TlsSettings::with_cert_dir(ours.path()))
        .unwrap()
        .server_config()
        .unwrap();
    let client = build_client_options(&base, &TlsSettings::with_cert_dir(theirs.path()))
        .unwrap()
        .client_config()
        .unwrap();

    let (_, server_ok) = handshake(client, server).await;
    assert!(!server_ok);
}
