//! Performatives exchanged by the auth gate.
//!
//! Only the connection-level and SASL performatives are modelled. Anything
//! else a peer sends (`begin`, `attach`, …) is kept as
//! [`Performative::Other`] so the connection can ignore it without failing.

use bytes::{Bytes, BytesMut};

use super::types::{Fields, Value, fields_from_value, fields_to_value};
use crate::{Error, Result};

mod descriptor {
    pub const OPEN: u64 = 0x10;
    pub const CLOSE: u64 = 0x18;
    pub const ERROR: u64 = 0x1d;
    pub const SASL_MECHANISMS: u64 = 0x40;
    pub const SASL_INIT: u64 = 0x41;
    pub const SASL_CHALLENGE: u64 = 0x42;
    pub const SASL_RESPONSE: u64 = 0x43;
    pub const SASL_OUTCOME: u64 = 0x44;

    /// Map a symbolic descriptor to its numeric code.
    pub fn from_symbol(name: &str) -> Option<u64> {
        Some(match name {
            "amqp:open:list" => OPEN,
            "amqp:close:list" => CLOSE,
            "amqp:error:list" => ERROR,
            "amqp:sasl-mechanisms:list" => SASL_MECHANISMS,
            "amqp:sasl-init:list" => SASL_INIT,
            "amqp:sasl-challenge:list" => SASL_CHALLENGE,
            "amqp:sasl-response:list" => SASL_RESPONSE,
            "amqp:sasl-outcome:list" => SASL_OUTCOME,
            _ => return None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection performatives
// ─────────────────────────────────────────────────────────────────────────────

/// `open`
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    /// Container id of the sender
    pub container_id: String,
    /// Virtual host the sender wants to reach
    pub hostname: Option<String>,
    /// Largest frame the sender accepts
    pub max_frame_size: u32,
    /// Highest channel number the sender accepts
    pub channel_max: u16,
    /// Idle timeout in milliseconds
    pub idle_time_out: Option<u32>,
    /// Capabilities the sender supports
    pub offered_capabilities: Vec<String>,
    /// Capabilities the sender wants from the peer
    pub desired_capabilities: Vec<String>,
    /// Connection properties
    pub properties: Fields,
}

impl Open {
    /// `open` with protocol defaults for everything but the container id.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            hostname: None,
            max_frame_size: u32::MAX,
            channel_max: u16::MAX,
            idle_time_out: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: Fields::new(),
        }
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::string(self.container_id.clone()),
            opt_string(self.hostname.as_ref()),
            Value::Uint(self.max_frame_size),
            Value::Ushort(self.channel_max),
            self.idle_time_out.map_or(Value::Null, Value::Uint),
            Value::Null,
            Value::Null,
            symbols_to_value(&self.offered_capabilities),
            symbols_to_value(&self.desired_capabilities),
            if self.properties.is_empty() {
                Value::Null
            } else {
                fields_to_value(&self.properties)
            },
        ]
    }

    fn from_fields(mut f: FieldList) -> Result<Self> {
        let container_id = f
            .string(0)?
            .ok_or_else(|| Error::codec("open is missing container-id"))?;
        Ok(Self {
            container_id,
            hostname: f.string(1)?,
            max_frame_size: f.uint(2)?.map_or(u32::MAX, |v| u32::try_from(v).unwrap_or(u32::MAX)),
            channel_max: f.uint(3)?.map_or(u16::MAX, |v| u16::try_from(v).unwrap_or(u16::MAX)),
            idle_time_out: f.uint(4)?.and_then(|v| u32::try_from(v).ok()),
            offered_capabilities: f.symbols(7)?,
            desired_capabilities: f.symbols(8)?,
            properties: fields_from_value(f.take(9))?,
        })
    }
}

/// `close`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Close {
    /// Reason for closing, if abnormal
    pub error: Option<ErrorCondition>,
}

/// AMQP `error`
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCondition {
    /// Symbolic condition, e.g. `amqp:unauthorized-access`
    pub condition: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Extra information
    pub info: Fields,
}

impl ErrorCondition {
    fn to_value(&self) -> Value {
        described_list(
            descriptor::ERROR,
            vec![
                Value::symbol(self.condition.clone()),
                opt_string(self.description.as_ref()),
                if self.info.is_empty() {
                    Value::Null
                } else {
                    fields_to_value(&self.info)
                },
            ],
        )
    }

    fn from_value(value: Value) -> Result<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        let (code, mut f) = split_described(value)?;
        if code != descriptor::ERROR {
            return Err(Error::codec(format!("expected error, got descriptor {code:#x}")));
        }
        let condition = f
            .string(0)?
            .ok_or_else(|| Error::codec("error is missing condition"))?;
        Ok(Some(Self {
            condition,
            description: f.string(1)?,
            info: fields_from_value(f.take(2))?,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SASL performatives
// ─────────────────────────────────────────────────────────────────────────────

/// `sasl-mechanisms`
#[derive(Debug, Clone, PartialEq)]
pub struct SaslMechanisms {
    /// Mechanisms the server offers, in preference order
    pub mechanisms: Vec<String>,
}

/// `sasl-init`
#[derive(Debug, Clone, PartialEq)]
pub struct SaslInit {
    /// Mechanism chosen by the client
    pub mechanism: String,
    /// Mechanism-specific initial response
    pub initial_response: Option<Bytes>,
    /// Host the client is connecting to
    pub hostname: Option<String>,
}

/// `sasl-outcome` code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslCode {
    /// Authentication succeeded
    Ok,
    /// Bad credentials
    Auth,
    /// Unspecified system error
    Sys,
    /// Permanent system error
    SysPerm,
    /// Transient system error
    SysTemp,
}

impl SaslCode {
    fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Auth => 1,
            Self::Sys => 2,
            Self::SysPerm => 3,
            Self::SysTemp => 4,
        }
    }

    fn from_u64(v: u64) -> Result<Self> {
        Ok(match v {
            0 => Self::Ok,
            1 => Self::Auth,
            2 => Self::Sys,
            3 => Self::SysPerm,
            4 => Self::SysTemp,
            other => return Err(Error::codec(format!("unknown sasl code {other}"))),
        })
    }
}

/// `sasl-outcome`
#[derive(Debug, Clone, PartialEq)]
pub struct SaslOutcome {
    /// Result of the exchange
    pub code: SaslCode,
    /// Mechanism-specific data
    pub additional_data: Option<Bytes>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Performative
// ─────────────────────────────────────────────────────────────────────────────

/// Body of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    /// `open`
    Open(Open),
    /// `close`
    Close(Close),
    /// `sasl-mechanisms`
    SaslMechanisms(SaslMechanisms),
    /// `sasl-init`
    SaslInit(SaslInit),
    /// `sasl-challenge`
    SaslChallenge(Bytes),
    /// `sasl-response`
    SaslResponse(Bytes),
    /// `sasl-outcome`
    SaslOutcome(SaslOutcome),
    /// Any other described body, kept undecoded
    Other {
        /// Descriptor as received
        descriptor: Value,
        /// Body as received
        body: Value,
    },
}

impl Performative {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Close(_) => "close",
            Self::SaslMechanisms(_) => "sasl-mechanisms",
            Self::SaslInit(_) => "sasl-init",
            Self::SaslChallenge(_) => "sasl-challenge",
            Self::SaslResponse(_) => "sasl-response",
            Self::SaslOutcome(_) => "sasl-outcome",
            Self::Other { .. } => "other",
        }
    }

    /// Encode as a described list.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let value = match self {
            Self::Open(open) => described_list(descriptor::OPEN, open.to_fields()),
            Self::Close(close) => described_list(
                descriptor::CLOSE,
                vec![close.error.as_ref().map_or(Value::Null, ErrorCondition::to_value)],
            ),
            Self::SaslMechanisms(m) => described_list(
                descriptor::SASL_MECHANISMS,
                vec![Value::Array(m.mechanisms.iter().cloned().map(Value::Symbol).collect())],
            ),
            Self::SaslInit(init) => described_list(
                descriptor::SASL_INIT,
                vec![
                    Value::symbol(init.mechanism.clone()),
                    init.initial_response.clone().map_or(Value::Null, Value::Binary),
                    opt_string(init.hostname.as_ref()),
                ],
            ),
            Self::SaslChallenge(data) => {
                described_list(descriptor::SASL_CHALLENGE, vec![Value::Binary(data.clone())])
            }
            Self::SaslResponse(data) => {
                described_list(descriptor::SASL_RESPONSE, vec![Value::Binary(data.clone())])
            }
            Self::SaslOutcome(outcome) => described_list(
                descriptor::SASL_OUTCOME,
                vec![
                    Value::Ubyte(outcome.code.as_u8()),
                    outcome.additional_data.clone().map_or(Value::Null, Value::Binary),
                ],
            ),
            Self::Other { descriptor, body } => Value::described(descriptor.clone(), body.clone()),
        };
        value.encode(buf)
    }

    /// Decode a performative from the front of a frame body.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let value = Value::decode(buf)?;
        let Value::Described(descriptor, body) = value else {
            return Err(Error::codec("frame body is not a described type"));
        };
        let code = match descriptor.as_ref() {
            Value::Ulong(code) => Some(*code),
            Value::Symbol(name) => descriptor::from_symbol(name),
            _ => None,
        };
        let Some(code) = code else {
            return Ok(Self::Other {
                descriptor: *descriptor,
                body: *body,
            });
        };

        let mut f = match code {
            descriptor::OPEN
            | descriptor::CLOSE
            | descriptor::SASL_MECHANISMS
            | descriptor::SASL_INIT
            | descriptor::SASL_CHALLENGE
            | descriptor::SASL_RESPONSE
            | descriptor::SASL_OUTCOME => FieldList::from_value(*body)?,
            _ => {
                return Ok(Self::Other {
                    descriptor: *descriptor,
                    body: *body,
                });
            }
        };

        Ok(match code {
            descriptor::OPEN => Self::Open(Open::from_fields(f)?),
            descriptor::CLOSE => Self::Close(Close {
                error: ErrorCondition::from_value(f.take(0))?,
            }),
            descriptor::SASL_MECHANISMS => Self::SaslMechanisms(SaslMechanisms {
                mechanisms: f.symbols(0)?,
            }),
            descriptor::SASL_INIT => Self::SaslInit(SaslInit {
                mechanism: f
                    .string(0)?
                    .ok_or_else(|| Error::codec("sasl-init is missing mechanism"))?,
                initial_response: f.binary(1)?,
                hostname: f.string(2)?,
            }),
            descriptor::SASL_CHALLENGE => Self::SaslChallenge(f.binary(0)?.unwrap_or_default()),
            descriptor::SASL_RESPONSE => Self::SaslResponse(f.binary(0)?.unwrap_or_default()),
            _ => Self::SaslOutcome(SaslOutcome {
                code: SaslCode::from_u64(
                    f.uint(0)?
                        .ok_or_else(|| Error::codec("sasl-outcome is missing code"))?,
                )?,
                additional_data: f.binary(1)?,
            }),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Positional fields of a described list. Missing trailing fields read as
/// `null`.
struct FieldList(Vec<Value>);

impl FieldList {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => Ok(Self(items)),
            other => Err(Error::codec(format!("expected field list, got {other:?}"))),
        }
    }

    fn take(&mut self, index: usize) -> Value {
        self.0
            .get_mut(index)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn string(&mut self, index: usize) -> Result<Option<String>> {
        match self.take(index) {
            Value::Null => Ok(None),
            Value::String(s) | Value::Symbol(s) => Ok(Some(s)),
            other => Err(Error::codec(format!("field {index}: expected string, got {other:?}"))),
        }
    }

    fn uint(&mut self, index: usize) -> Result<Option<u64>> {
        let value = self.take(index);
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::codec(format!("field {index}: expected unsigned, got {value:?}")))
    }

    fn binary(&mut self, index: usize) -> Result<Option<Bytes>> {
        match self.take(index) {
            Value::Null => Ok(None),
            Value::Binary(b) => Ok(Some(b)),
            other => Err(Error::codec(format!("field {index}: expected binary, got {other:?}"))),
        }
    }

    /// A `multiple="true"` symbol field: null, one symbol, or an array.
    fn symbols(&mut self, index: usize) -> Result<Vec<String>> {
        match self.take(index) {
            Value::Null => Ok(Vec::new()),
            Value::Symbol(s) => Ok(vec![s]),
            Value::Array(items) | Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Symbol(s) | Value::String(s) => Ok(s),
                    other => Err(Error::codec(format!(
                        "field {index}: expected symbol, got {other:?}"
                    ))),
                })
                .collect(),
            other => Err(Error::codec(format!("field {index}: expected symbols, got {other:?}"))),
        }
    }
}

fn split_described(value: Value) -> Result<(u64, FieldList)> {
    let Value::Described(descriptor, body) = value else {
        return Err(Error::codec("expected described type"));
    };
    let code = match *descriptor {
        Value::Ulong(code) => code,
        Value::Symbol(ref name) => descriptor::from_symbol(name)
            .ok_or_else(|| Error::codec(format!("unknown descriptor {name}")))?,
        ref other => return Err(Error::codec(format!("invalid descriptor {other:?}"))),
    };
    Ok((code, FieldList::from_value(*body)?))
}

/// Build a described list, dropping trailing nulls.
fn described_list(code: u64, mut fields: Vec<Value>) -> Value {
    while fields.last().is_some_and(Value::is_null) {
        fields.pop();
    }
    Value::described(Value::Ulong(code), Value::List(fields))
}

fn opt_string(s: Option<&String>) -> Value {
    s.map_or(Value::Null, |s| Value::string(s.clone()))
}

fn symbols_to_value(symbols: &[String]) -> Value {
    match symbols {
        [] => Value::Null,
        [one] => Value::symbol(one.clone()),
        many => Value::Array(many.iter().cloned().map(Value::Symbol).collect()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn through_wire(p: &Performative) -> Performative {
        let mut buf = BytesMut::new();
        p.encode(&mut buf).unwrap();
        Performative::decode(&mut &buf[..]).unwrap()
    }

    #[test]
    fn open_with_properties_survives_the_wire() {
        let mut open = Open::new("gate");
        open.properties.insert(
            "authenticated-identity".into(),
            Value::Map(vec![(Value::string("sub"), Value::string("alice"))]),
        );
        open.properties.insert(
            "groups".into(),
            Value::List(vec![Value::string("manage")]),
        );
        let decoded = through_wire(&Performative::Open(open.clone()));
        assert_eq!(decoded, Performative::Open(open));
    }

    #[test]
    fn open_trailing_fields_may_be_omitted() {
        // GIVEN: open carrying only a container id, as minimal clients send it
        let value = Value::described(Value::Ulong(0x10), Value::List(vec![Value::string("c1")]));
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        // WHEN: decoded
        let Performative::Open(open) = Performative::decode(&mut &buf[..]).unwrap() else {
            panic!("expected open");
        };
        // THEN: protocol defaults fill the rest
        assert_eq!(open.container_id, "c1");
        assert_eq!(open.max_frame_size, u32::MAX);
        assert_eq!(open.channel_max, u16::MAX);
        assert!(open.properties.is_empty());
    }

    #[test]
    fn open_without_container_id_is_rejected() {
        let value = Value::described(Value::Ulong(0x10), Value::List(vec![]));
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        assert!(Performative::decode(&mut &buf[..]).is_err());
    }

    #[test]
    fn symbolic_descriptor_is_understood() {
        let value = Value::described(
            Value::symbol("amqp:close:list"),
            Value::List(vec![]),
        );
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        assert_eq!(
            Performative::decode(&mut &buf[..]).unwrap(),
            Performative::Close(Close::default())
        );
    }

    #[test]
    fn close_with_error_condition() {
        let close = Close {
            error: Some(ErrorCondition {
                condition: "amqp:unauthorized-access".into(),
                description: Some("denied".into()),
                info: Fields::new(),
            }),
        };
        assert_eq!(
            through_wire(&Performative::Close(close.clone())),
            Performative::Close(close)
        );
    }

    #[test]
    fn mechanisms_accept_single_symbol() {
        let value = Value::described(
            Value::Ulong(0x40),
            Value::List(vec![Value::symbol("ANONYMOUS")]),
        );
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        assert_eq!(
            Performative::decode(&mut &buf[..]).unwrap(),
            Performative::SaslMechanisms(SaslMechanisms {
                mechanisms: vec!["ANONYMOUS".into()]
            })
        );
    }

    #[test]
    fn sasl_init_carries_initial_response() {
        let init = SaslInit {
            mechanism: "PLAIN".into(),
            initial_response: Some(Bytes::from_static(b"\0alice\0secret")),
            hostname: Some("localhost".into()),
        };
        assert_eq!(
            through_wire(&Performative::SaslInit(init.clone())),
            Performative::SaslInit(init)
        );
    }

    #[test]
    fn unknown_performative_is_kept_as_other() {
        // begin (0x11) is not modelled
        let value = Value::described(Value::Ulong(0x11), Value::List(vec![Value::Null]));
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        let decoded = Performative::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded.name(), "other");
    }

    #[test]
    fn outcome_code_out_of_range_is_rejected() {
        let value = Value::described(Value::Ulong(0x44), Value::List(vec![Value::Ubyte(9)]));
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        assert!(Performative::decode(&mut &buf[..]).is_err());
    }

    #[test]
    fn non_described_body_is_rejected() {
        let mut buf = BytesMut::new();
        Value::List(vec![]).encode(&mut buf).unwrap();
        assert!(Performative::decode(&mut &buf[..]).is_err());
    }
}
