//! SASL server mechanisms.
//!
//! The gate offers `PLAIN` and `ANONYMOUS`. `PLAIN` hands the decoded
//! credentials to an [`Authenticator`]; the stock [`AcceptAll`] says yes to
//! everything, empty and missing passwords included.

use std::fmt;
use std::sync::Arc;

use crate::amqp::SaslInit;

/// `PLAIN` mechanism name
pub const PLAIN: &str = "PLAIN";
/// `ANONYMOUS` mechanism name
pub const ANONYMOUS: &str = "ANONYMOUS";

/// Credential check used by the `PLAIN` mechanism.
pub trait Authenticator: Send + Sync {
    /// Return `true` to accept the credentials.
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Accepts every username/password pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _username: &str, _password: &str) -> bool {
        true
    }
}

/// Mechanism a client settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// `PLAIN`
    Plain,
    /// `ANONYMOUS`
    Anonymous,
}

impl Mechanism {
    /// Wire name of the mechanism.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => PLAIN,
            Self::Anonymous => ANONYMOUS,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed SASL exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslIdentity {
    /// Mechanism used
    pub mechanism: Mechanism,
    /// Username reported by the mechanism; `None` for `ANONYMOUS`
    pub username: Option<String>,
}

/// Why the server refused a `sasl-init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslRejection {
    /// Mechanism was not offered
    UnsupportedMechanism(String),
    /// The authenticator said no
    BadCredentials,
}

impl fmt::Display for SaslRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMechanism(name) => write!(f, "unsupported mechanism {name}"),
            Self::BadCredentials => f.write_str("credentials rejected"),
        }
    }
}

/// Server-side mechanism set.
#[derive(Clone)]
pub struct SaslServer {
    plain: Option<Arc<dyn Authenticator>>,
    anonymous: bool,
}

impl fmt::Debug for SaslServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslServer")
            .field("plain", &self.plain.is_some())
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

impl Default for SaslServer {
    /// `PLAIN` with [`AcceptAll`] plus `ANONYMOUS`.
    fn default() -> Self {
        Self::new().enable_plain(AcceptAll).enable_anonymous()
    }
}

impl SaslServer {
    /// Server with no mechanisms enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plain: None,
            anonymous: false,
        }
    }

    /// Enable `PLAIN` backed by `authenticator`.
    #[must_use]
    pub fn enable_plain(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.plain = Some(Arc::new(authenticator));
        self
    }

    /// Enable `ANONYMOUS`.
    #[must_use]
    pub fn enable_anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Mechanisms to advertise in `sasl-mechanisms`.
    #[must_use]
    pub fn mechanisms(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if self.plain.is_some() {
            names.push(PLAIN.to_string());
        }
        if self.anonymous {
            names.push(ANONYMOUS.to_string());
        }
        names
    }

    /// Evaluate a client's `sasl-init`.
    pub fn negotiate(&self, init: &SaslInit) -> Result<SaslIdentity, SaslRejection> {
        match init.mechanism.as_str() {
            PLAIN => {
                let Some(authenticator) = &self.plain else {
                    return Err(SaslRejection::UnsupportedMechanism(init.mechanism.clone()));
                };
                let response = init.initial_response.as_deref().unwrap_or_default();
                let (username, password) = parse_plain(response);
                let accepted = authenticator.authenticate(
                    username.as_deref().unwrap_or_default(),
                    password.as_deref().unwrap_or_default(),
                );
                if accepted {
                    Ok(SaslIdentity {
                        mechanism: Mechanism::Plain,
                        username,
                    })
                } else {
                    Err(SaslRejection::BadCredentials)
                }
            }
            ANONYMOUS if self.anonymous => Ok(SaslIdentity {
                mechanism: Mechanism::Anonymous,
                username: None,
            }),
            other => Err(SaslRejection::UnsupportedMechanism(other.to_string())),
        }
    }
}

/// Split a `PLAIN` response (`[authzid] NUL authcid NUL passwd`) into
/// username and password. Missing parts come back as `None`.
#[must_use]
pub fn parse_plain(response: &[u8]) -> (Option<String>, Option<String>) {
    let mut parts = response.split(|b| *b == 0).skip(1);
    let username = parts.next().map(|p| String::from_utf8_lossy(p).into_owned());
    let password = parts.next().map(|p| String::from_utf8_lossy(p).into_owned());
    (username, password)
}

/// Build a `PLAIN` initial response with an empty authzid.
#[must_use]
pub fn plain_response(username: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(username.len() + password.len() + 2);
    out.push(0);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out
}
