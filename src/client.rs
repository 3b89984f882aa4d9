//! Auth service client.
//!
//! Connects to the gate with client [`TransportOptions`], runs the SASL
//! exchange and reads the grant back out of the gate's `open` properties.
//! This is the other half of the gate: whatever consumes
//! `authenticated-identity` and `groups` sees them through here.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

use crate::amqp::{
    Close, Fields, Frame, FrameCodec, Open, Packet, Performative, ProtocolHeader, SaslCode,
    SaslInit, next_performative, read_header,
};
use crate::listener::{AUTHENTICATED_IDENTITY, AuthenticatedIdentity, GROUPS};
use crate::sasl::{ANONYMOUS, PLAIN, plain_response};
use crate::tls::TransportOptions;
use crate::{Error, Result};

/// Default overall timeout of [`AuthServiceClient::authenticate`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials presented to the gate.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Username; `None` selects `ANONYMOUS`
    pub username: Option<String>,
    /// Password sent with `PLAIN`
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Credentials {
    /// `PLAIN` credentials.
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// No credentials; authenticates with `ANONYMOUS`.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// What the gate granted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationGrant {
    /// Container id of the gate
    pub container_id: String,
    /// `authenticated-identity`, if present
    pub identity: Option<AuthenticatedIdentity>,
    /// `groups`
    pub groups: Vec<String>,
    /// Every property of the gate's `open`
    #[serde(skip)]
    pub properties: Fields,
}

impl AuthorizationGrant {
    fn from_open(open: Open) -> Self {
        let identity = open
            .properties
            .get(AUTHENTICATED_IDENTITY)
            .and_then(AuthenticatedIdentity::from_value);
        let groups = open
            .properties
            .get(GROUPS)
            .and_then(|v| v.as_list())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            container_id: open.container_id,
            identity,
            groups,
            properties: open.properties,
        }
    }

    /// Whether `group` was granted.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Client for the auth gate.
#[derive(Debug, Clone)]
pub struct AuthServiceClient {
    options: TransportOptions,
    timeout: Duration,
}

impl AuthServiceClient {
    /// Client connecting with `options` (normally from
    /// [`build_client_options`](crate::tls::build_client_options)).
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect, authenticate and return the grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for missing host/port, [`Error::Sasl`] if
    /// the gate refuses the credentials, [`Error::Timeout`] if the exchange
    /// does not finish in time, and IO/TLS/protocol errors otherwise.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthorizationGrant> {
        tokio::time::timeout(self.timeout, self.exchange(credentials))
            .await
            .map_err(|_| Error::Timeout(format!("authentication did not finish in {:?}", self.timeout)))?
    }

    async fn exchange(&self, credentials: &Credentials) -> Result<AuthorizationGrant> {
        let endpoint = self.options.endpoint();
        let host = endpoint.host.as_deref().unwrap_or("localhost");
        let port = endpoint
            .port
            .ok_or_else(|| Error::Config("endpoint port is required".to_string()))?;

        let tcp = TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(std::sync::Arc::new(self.options.client_config()?));
        let tls = connector
            .connect(self.options.server_name()?, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        debug!(host, port, "TLS established");

        authenticate_over(tls, credentials, host).await
    }
}

/// Run the client side of the gate's sequence over an established stream.
///
/// # Errors
///
/// See [`AuthServiceClient::authenticate`].
pub async fn authenticate_over<S>(
    stream: S,
    credentials: &Credentials,
    hostname: &str,
) -> Result<AuthorizationGrant>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::default());

    framed.send(Packet::Header(ProtocolHeader::SASL)).await?;
    expect_header(&mut framed, ProtocolHeader::SASL).await?;

    let offered = match next_performative(&mut framed).await? {
        Performative::SaslMechanisms(m) => m.mechanisms,
        other => return Err(unexpected("sasl-mechanisms", &other)),
    };

    let init = match &credentials.username {
        Some(username) if offered.iter().any(|m| m == PLAIN) => SaslInit {
            mechanism: PLAIN.to_string(),
            initial_response: Some(
                plain_response(username, credentials.password.as_deref().unwrap_or_default())
                    .into(),
            ),
            hostname: Some(hostname.to_string()),
        },
        None if offered.iter().any(|m| m == ANONYMOUS) => SaslInit {
            mechanism: ANONYMOUS.to_string(),
            initial_response: None,
            hostname: Some(hostname.to_string()),
        },
        _ => {
            return Err(Error::Sasl(format!(
                "no usable mechanism among {offered:?}"
            )));
        }
    };
    debug!(mechanism = %init.mechanism, "sending sasl-init");
    framed
        .send(Packet::Frame(Frame::sasl(Performative::SaslInit(init))))
        .await?;

    match next_performative(&mut framed).await? {
        Performative::SaslOutcome(outcome) if outcome.code == SaslCode::Ok => {}
        Performative::SaslOutcome(outcome) => {
            return Err(Error::Sasl(format!("outcome {:?}", outcome.code)));
        }
        other => return Err(unexpected("sasl-outcome", &other)),
    }

    framed.send(Packet::Header(ProtocolHeader::AMQP)).await?;
    let mut open = Open::new(format!("none-authservice-probe-{}", Uuid::new_v4()));
    open.hostname = Some(hostname.to_string());
    framed
        .send(Packet::Frame(Frame::amqp(Performative::Open(open))))
        .await?;
    expect_header(&mut framed, ProtocolHeader::AMQP).await?;

    let grant = match next_performative(&mut framed).await? {
        Performative::Open(open) => AuthorizationGrant::from_open(open),
        other => return Err(unexpected("open", &other)),
    };

    loop {
        match framed.next().await {
            Some(Ok(Packet::Frame(Frame {
                body: Some(Performative::Close(close)),
                ..
            }))) => {
                if let Some(error) = close.error {
                    return Err(Error::protocol(format!(
                        "gate closed with {}: {}",
                        error.condition,
                        error.description.unwrap_or_default()
                    )));
                }
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    // The gate may already be gone.
    let _ = framed
        .send(Packet::Frame(Frame::amqp(Performative::Close(Close::default()))))
        .await;
    let _ = framed.close().await;

    Ok(grant)
}

async fn expect_header<S>(framed: &mut Framed<S, FrameCodec>, expected: ProtocolHeader) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = read_header(framed).await?;
    if header == expected {
        Ok(())
    } else {
        Err(Error::protocol(format!("expected {expected:?}, got {header:?}")))
    }
}

fn unexpected(wanted: &str, got: &Performative) -> Error {
    Error::protocol(format!("expected {wanted}, got {}", got.name()))
}
