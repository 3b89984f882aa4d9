//! Per-connection state machine.
//!
//! ```text
//! SASL header ─▶ sasl-mechanisms ─▶ sasl-init ─▶ sasl-outcome
//!   ─▶ AMQP header ─▶ peer open ─▶ on_open ─▶ local open
//!   ─▶ [close ─▶ peer close] ─▶ on_close
//! ```
//!
//! Anything that goes wrong before `on_open` drops the connection without
//! the handler ever seeing it.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use super::handler::ConnectionEventHandler;
use crate::amqp::{
    Close, Fields, Frame, FrameCodec, Open, Packet, Performative, ProtocolHeader, SaslCode,
    SaslMechanisms, SaslOutcome, next_performative, read_header,
};
use crate::sasl::{SaslIdentity, SaslServer};
use crate::{Error, Result};

/// Lifecycle of an opened connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Peer's `open` received
    Open,
    /// Gate will close after sending its `open`
    Closing,
    /// Closed or dropped
    Closed,
}

/// An AMQP connection that completed SASL and received the peer's `open`.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    peer_addr: Option<SocketAddr>,
    sasl: SaslIdentity,
    remote_open: Open,
    local_properties: Fields,
    state: ConnectionState,
}

impl Connection {
    /// A freshly opened connection whose local properties start as
    /// `local_properties`.
    #[must_use]
    pub fn new(
        id: u64,
        peer_addr: Option<SocketAddr>,
        sasl: SaslIdentity,
        remote_open: Open,
        local_properties: Fields,
    ) -> Self {
        Self {
            id,
            peer_addr,
            sasl,
            remote_open,
            local_properties,
            state: ConnectionState::Open,
        }
    }

    /// Listener-assigned connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote socket address.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Outcome of the SASL exchange.
    #[must_use]
    pub fn sasl(&self) -> &SaslIdentity {
        &self.sasl
    }

    /// SASL username, if one was given and is non-empty.
    #[must_use]
    pub fn sasl_username(&self) -> Option<&str> {
        self.sasl.username.as_deref().filter(|name| !name.is_empty())
    }

    /// The peer's `open`.
    #[must_use]
    pub fn remote_open(&self) -> &Open {
        &self.remote_open
    }

    /// Properties to send in the local `open`.
    #[must_use]
    pub fn local_properties(&self) -> &Fields {
        &self.local_properties
    }

    /// Mutable access to the local `open` properties.
    pub fn local_properties_mut(&mut self) -> &mut Fields {
        &mut self.local_properties
    }

    /// Ask the gate to close once its `open` is sent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Everything a connection task needs from its listener.
#[derive(Debug, Clone)]
pub struct ConnectionSetup {
    /// Container id sent in the local `open`
    pub container_id: String,
    /// Mechanisms offered
    pub sasl: SaslServer,
    /// Properties every local `open` starts with
    pub base_properties: Fields,
    /// Largest inbound frame accepted
    pub max_frame_size: u32,
    /// Wait for the peer's `close`
    pub close_timeout: Duration,
}

type Transport<S> = Framed<S, FrameCodec>;

/// Run one connection to completion over an established (TLS) stream.
///
/// # Errors
///
/// Returns an error if the peer deviates from the connection sequence, the
/// SASL exchange is refused, or the stream fails.
pub async fn drive<S, H>(
    stream: S,
    id: u64,
    peer_addr: Option<SocketAddr>,
    setup: &ConnectionSetup,
    handler: &H,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: ConnectionEventHandler + ?Sized,
{
    let mut framed = Framed::new(stream, FrameCodec::new(setup.max_frame_size));

    let sasl = negotiate_sasl(&mut framed, setup).await?;
    debug!(
        connection = id,
        mechanism = %sasl.mechanism,
        username = ?sasl.username,
        "SASL complete"
    );

    expect_header(&mut framed, ProtocolHeader::AMQP).await?;
    let remote_open = match next_performative(&mut framed).await? {
        Performative::Open(open) => open,
        other => {
            return Err(Error::protocol(format!(
                "expected open, got {}",
                other.name()
            )));
        }
    };
    trace!(connection = id, container_id = %remote_open.container_id, "peer open");

    let mut connection = Connection::new(
        id,
        peer_addr,
        sasl,
        remote_open,
        setup.base_properties.clone(),
    );
    handler.on_open(&mut connection);

    let result = finish(&mut framed, &connection, setup).await;

    connection.mark_closed();
    handler.on_close(&connection);
    result
}

async fn negotiate_sasl<S>(framed: &mut Transport<S>, setup: &ConnectionSetup) -> Result<SaslIdentity>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_header(framed, ProtocolHeader::SASL).await?;
    framed
        .send(Packet::Frame(Frame::sasl(Performative::SaslMechanisms(
            SaslMechanisms {
                mechanisms: setup.sasl.mechanisms(),
            },
        ))))
        .await?;

    let init = match next_performative(framed).await? {
        Performative::SaslInit(init) => init,
        other => {
            return Err(Error::protocol(format!(
                "expected sasl-init, got {}",
                other.name()
            )));
        }
    };

    match setup.sasl.negotiate(&init) {
        Ok(identity) => {
            framed.send(outcome(SaslCode::Ok)).await?;
            Ok(identity)
        }
        Err(rejection) => {
            framed.send(outcome(SaslCode::Auth)).await?;
            framed.close().await?;
            Err(Error::Sasl(rejection.to_string()))
        }
    }
}

/// Send the local `open`, then close or wait for the peer to.
async fn finish<S>(
    framed: &mut Transport<S>,
    connection: &Connection,
    setup: &ConnectionSetup,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut open = Open::new(setup.container_id.clone());
    open.max_frame_size = framed.codec().max_frame_size();
    open.channel_max = 0;
    open.properties = connection.local_properties().clone();
    framed
        .send(Packet::Frame(Frame::amqp(Performative::Open(open))))
        .await?;

    if connection.state() == ConnectionState::Closing {
        framed
            .send(Packet::Frame(Frame::amqp(Performative::Close(Close::default()))))
            .await?;
        if tokio::time::timeout(setup.close_timeout, await_close(framed))
            .await
            .is_err()
        {
            debug!(connection = connection.id(), "peer did not close in time");
        }
    } else {
        await_close(framed).await?;
        framed
            .send(Packet::Frame(Frame::amqp(Performative::Close(Close::default()))))
            .await?;
    }

    framed.close().await
}

/// Read the peer's protocol header and echo ours. A mismatched header is
/// answered with `expected` before failing.
async fn expect_header<S>(framed: &mut Transport<S>, expected: ProtocolHeader) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = read_header(framed).await?;
    framed.send(Packet::Header(expected)).await?;
    if header.id == expected.id && header.is_v1_0() {
        Ok(())
    } else {
        let _ = framed.close().await;
        Err(Error::protocol(format!(
            "unsupported protocol header {:?} {}.{}.{}",
            header.id, header.major, header.minor, header.revision
        )))
    }
}

/// Wait for the peer's `close` or end of stream, ignoring anything else.
async fn await_close<S>(framed: &mut Transport<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match framed.next().await {
            Some(Ok(Packet::Frame(Frame {
                body: Some(Performative::Close(close)),
                ..
            }))) => {
                if let Some(error) = close.error {
                    debug!(condition = %error.condition, "peer closed with error");
                }
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        }
    }
}

fn outcome(code: SaslCode) -> Packet {
    Packet::Frame(Frame::sasl(Performative::SaslOutcome(SaslOutcome {
        code,
        additional_data: None,
    })))
}
