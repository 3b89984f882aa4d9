//! Minimal AMQP 1.0 wire layer.
//!
//! Just enough of the protocol for a connection that negotiates SASL,
//! exchanges `open` and `close`, and carries nothing else:
//!
//! - [`types`]: the AMQP type system (`Value`, `Fields`)
//! - [`performative`]: SASL and connection performatives
//! - [`frame`]: protocol headers, frames and the `tokio_util` codec

pub mod frame;
pub mod performative;
pub mod types;

pub use frame::{
    Frame, FrameCodec, FrameKind, MAX_FRAME_SIZE_LIMIT, Packet, ProtocolHeader, ProtocolId,
    next_performative, read_header,
};
pub use performative::{
    Close, ErrorCondition, Open, Performative, SaslCode, SaslInit, SaslMechanisms, SaslOutcome,
};
pub use types::{Fields, Value};
