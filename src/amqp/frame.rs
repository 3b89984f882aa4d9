//! Framing: protocol headers and AMQP/SASL frames.
//!
//! A connection starts with an 8-byte protocol header in each direction,
//! followed by frames. SASL and AMQP layers each begin with their own
//! header, so headers can arrive in the middle of a stream. The codec tells
//! them apart by the leading `AMQP` magic, which can never be a valid frame
//! size under [`FrameCodec`]'s limit.
//!
//! ```text
//! header: 'A' 'M' 'Q' 'P' | protocol-id | major | minor | revision
//! frame:  size:u32 | doff:u8 | type:u8 | channel:u16 | [ext] | body
//! ```

use bytes::{Buf, BufMut, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::trace;

use super::performative::Performative;
use crate::{Error, Result};

const MAGIC: &[u8; 4] = b"AMQP";
const HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 8;

/// Default upper bound on inbound frame size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Largest usable frame size limit. A size at or above `AMQP` read as a
/// big-endian `u32` would be mistaken for a protocol header.
pub const MAX_FRAME_SIZE_LIMIT: u32 = 0x414D_5150 - 1;

/// Protocol layer announced by a protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    /// Plain AMQP (`0`)
    Amqp,
    /// In-band TLS upgrade (`2`)
    Tls,
    /// SASL security layer (`3`)
    Sasl,
    /// Any other id; answered with the expected header, then dropped
    Other(u8),
}

impl ProtocolId {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Amqp,
            2 => Self::Tls,
            3 => Self::Sasl,
            other => Self::Other(other),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Amqp => 0,
            Self::Tls => 2,
            Self::Sasl => 3,
            Self::Other(b) => b,
        }
    }
}

/// An 8-byte protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Layer being negotiated
    pub id: ProtocolId,
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Revision
    pub revision: u8,
}

impl ProtocolHeader {
    /// `AMQP 3 1 0 0`
    pub const SASL: Self = Self::v1_0(ProtocolId::Sasl);
    /// `AMQP 0 1 0 0`
    pub const AMQP: Self = Self::v1_0(ProtocolId::Amqp);

    const fn v1_0(id: ProtocolId) -> Self {
        Self {
            id,
            major: 1,
            minor: 0,
            revision: 0,
        }
    }

    /// Whether the version is AMQP 1.0.0.
    #[must_use]
    pub fn is_v1_0(&self) -> bool {
        self.major == 1 && self.minor == 0 && self.revision == 0
    }
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// AMQP frame (`0x00`)
    Amqp,
    /// SASL frame (`0x01`)
    Sasl,
}

/// A decoded frame. `body` is `None` for empty (heartbeat) frames. Any
/// payload trailing the performative is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// AMQP or SASL
    pub kind: FrameKind,
    /// Channel number (ignored for SASL frames)
    pub channel: u16,
    /// Performative carried by the frame
    pub body: Option<Performative>,
}

impl Frame {
    /// AMQP frame on channel 0.
    #[must_use]
    pub fn amqp(body: Performative) -> Self {
        Self {
            kind: FrameKind::Amqp,
            channel: 0,
            body: Some(body),
        }
    }

    /// SASL frame.
    #[must_use]
    pub fn sasl(body: Performative) -> Self {
        Self {
            kind: FrameKind::Sasl,
            channel: 0,
            body: Some(body),
        }
    }
}

/// Unit exchanged on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Protocol header
    Header(ProtocolHeader),
    /// Frame
    Frame(Frame),
}

/// `tokio_util` codec for [`Packet`]s.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Codec rejecting inbound frames larger than `max_frame_size`,
    /// clamped to `512..=MAX_FRAME_SIZE_LIMIT`.
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        // 512 is the minimum every AMQP peer must accept.
        Self {
            max_frame_size: max_frame_size.clamp(512, MAX_FRAME_SIZE_LIMIT),
        }
    }

    /// Effective inbound frame size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if &src[..4] == MAGIC {
            let raw = src.split_to(HEADER_LEN);
            let header = ProtocolHeader {
                id: ProtocolId::from_byte(raw[4]),
                major: raw[5],
                minor: raw[6],
                revision: raw[7],
            };
            trace!(?header, "header received");
            return Ok(Some(Packet::Header(header)));
        }

        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if size > self.max_frame_size {
            return Err(Error::protocol(format!(
                "frame of {size} bytes exceeds limit of {}",
                self.max_frame_size
            )));
        }
        let size = size as usize;
        if size < FRAME_HEADER_LEN {
            return Err(Error::protocol(format!("frame size {size} below minimum")));
        }
        let doff = usize::from(src[4]) * 4;
        if doff < FRAME_HEADER_LEN || doff > size {
            return Err(Error::protocol(format!("invalid data offset {doff}")));
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let mut raw = src.split_to(size);
        let kind = match raw[5] {
            0x00 => FrameKind::Amqp,
            0x01 => FrameKind::Sasl,
            other => return Err(Error::protocol(format!("unknown frame type {other:#04x}"))),
        };
        let channel = u16::from_be_bytes([raw[6], raw[7]]);
        raw.advance(doff);

        let body = if raw.is_empty() {
            None
        } else {
            let mut slice: &[u8] = &raw;
            Some(Performative::decode(&mut slice)?)
        };
        trace!(?kind, channel, ?body, "frame received");

        Ok(Some(Packet::Frame(Frame {
            kind,
            channel,
            body,
        })))
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        match packet {
            Packet::Header(header) => {
                dst.put_slice(MAGIC);
                dst.put_u8(header.id.as_byte());
                dst.put_u8(header.major);
                dst.put_u8(header.minor);
                dst.put_u8(header.revision);
            }
            Packet::Frame(frame) => {
                let mut body = BytesMut::new();
                if let Some(performative) = &frame.body {
                    performative.encode(&mut body)?;
                }
                let size = u32::try_from(FRAME_HEADER_LEN + body.len())
                    .map_err(|_| Error::codec("frame exceeds 4 GiB"))?;
                dst.reserve(size as usize);
                dst.put_u32(size);
                dst.put_u8(2);
                dst.put_u8(match frame.kind {
                    FrameKind::Amqp => 0x00,
                    FrameKind::Sasl => 0x01,
                });
                dst.put_u16(frame.channel);
                dst.put_slice(&body);
            }
        }
        Ok(())
    }
}

/// Read the next packet and require a protocol header.
///
/// # Errors
///
/// Returns a protocol error on a frame or end of stream, or the codec error.
pub async fn read_header<S>(framed: &mut Framed<S, FrameCodec>) -> Result<ProtocolHeader>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(Packet::Header(header))) => Ok(header),
        Some(Ok(Packet::Frame(frame))) => Err(Error::protocol(format!(
            "expected protocol header, got {:?} frame",
            frame.kind
        ))),
        Some(Err(e)) => Err(e),
        None => Err(Error::protocol("connection closed before protocol header")),
    }
}

/// Next performative, skipping empty frames.
///
/// # Errors
///
/// Returns a protocol error on a header or end of stream, or the codec error.
pub async fn next_performative<S>(framed: &mut Framed<S, FrameCodec>) -> Result<Performative>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match framed.next().await {
            Some(Ok(Packet::Frame(Frame { body: Some(body), .. }))) => return Ok(body),
            Some(Ok(Packet::Frame(_))) => {}
            Some(Ok(Packet::Header(header))) => {
                return Err(Error::protocol(format!("unexpected header {:?}", header.id)));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::protocol("connection closed by peer")),
        }
    }
}
