//! Connection event handlers.
//!
//! A [`ConnectionEventHandler`] sees each connection twice: once after the
//! peer's `open` arrives (before the gate replies with its own `open`), and
//! once after the connection is gone. [`IdentityStamp`] is the stock
//! handler: it writes the authenticated identity and group grant into the
//! local `open` properties and closes straight away.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::connection::Connection;
use crate::amqp::Value;

/// Subject used when the SASL exchange carried no username.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";
/// Group granted to every authenticated connection.
pub const MANAGE_GROUP: &str = "manage";
/// `open` property carrying the identity map.
pub const AUTHENTICATED_IDENTITY: &str = "authenticated-identity";
/// `open` property carrying the group list.
pub const GROUPS: &str = "groups";

/// Identity the gate vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// Subject
    pub sub: String,
}

impl AuthenticatedIdentity {
    /// Identity with subject `sub`.
    pub fn new(sub: impl Into<String>) -> Self {
        Self { sub: sub.into() }
    }

    /// Identity for a SASL username; empty or missing names map to
    /// [`ANONYMOUS_SUBJECT`].
    #[must_use]
    pub fn from_username(username: Option<&str>) -> Self {
        match username {
            Some(name) if !name.is_empty() => Self::new(name),
            _ => Self::new(ANONYMOUS_SUBJECT),
        }
    }

    /// Wire form: `{"sub": <string>}` with a string key.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Map(vec![(Value::string("sub"), Value::string(self.sub.clone()))])
    }

    /// Read the wire form back.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("sub").and_then(Value::as_str).map(Self::new)
    }
}

/// Callbacks fired by the listener for each connection.
pub trait ConnectionEventHandler: Send + Sync + 'static {
    /// The peer's `open` arrived. Edits to the local properties are sent in
    /// the gate's `open`; [`Connection::close`] makes the gate close right
    /// after it.
    fn on_open(&self, connection: &mut Connection);

    /// The connection has closed or dropped after `on_open`.
    fn on_close(&self, connection: &Connection) {
        let _ = connection;
    }
}

/// Stamps identity and groups, then closes.
#[derive(Debug, Clone)]
pub struct IdentityStamp {
    groups: Vec<String>,
}

impl Default for IdentityStamp {
    fn default() -> Self {
        Self {
            groups: vec![MANAGE_GROUP.to_string()],
        }
    }
}

impl IdentityStamp {
    /// Stamp granting `groups` instead of `["manage"]`.
    #[must_use]
    pub fn with_groups(groups: Vec<String>) -> Self {
        Self { groups }
    }

    /// Groups this stamp grants.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

impl ConnectionEventHandler for IdentityStamp {
    fn on_open(&self, connection: &mut Connection) {
        let identity = AuthenticatedIdentity::from_username(connection.sasl_username());
        debug!(
            connection = %connection.id(),
            sub = %identity.sub,
            mechanism = %connection.sasl().mechanism,
            "stamping identity"
        );

        let groups = Value::List(self.groups.iter().cloned().map(Value::string).collect());
        let properties = connection.local_properties_mut();
        properties.insert(AUTHENTICATED_IDENTITY.to_string(), identity.to_value());
        properties.insert(GROUPS.to_string(), groups);

        connection.close();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::amqp::{Fields, Open};
    use crate::listener::connection::ConnectionState;
    use crate::sasl::{Mechanism, SaslIdentity};

    fn connection(mechanism: Mechanism, username: Option<&str>, base: Fields) -> Connection {
        Connection::new(
            1,
            None,
            SaslIdentity {
                mechanism,
                username: username.map(str::to_string),
            },
            Open::new("peer"),
            base,
        )
    }

    #[test]
    fn plain_username_becomes_subject() {
        // GIVEN: a PLAIN connection for alice
        let mut conn = connection(Mechanism::Plain, Some("alice"), Fields::new());
        // WHEN: the stamp runs
        IdentityStamp::default().on_open(&mut conn);
        // THEN: identity and groups are set and the connection is closing
        assert_eq!(
            conn.local_properties().get(AUTHENTICATED_IDENTITY),
            Some(&AuthenticatedIdentity::new("alice").to_value())
        );
        assert_eq!(
            conn.local_properties().get(GROUPS),
            Some(&Value::List(vec![Value::string("manage")]))
        );
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn anonymous_and_empty_usernames_map_to_anonymous() {
        for (mechanism, username) in [
            (Mechanism::Anonymous, None),
            (Mechanism::Plain, Some("")),
            (Mechanism::Plain, None),
        ] {
            let mut conn = connection(mechanism, username, Fields::new());
            IdentityStamp::default().on_open(&mut conn);
            let identity = conn
                .local_properties()
                .get(AUTHENTICATED_IDENTITY)
                .and_then(AuthenticatedIdentity::from_value);
            assert_eq!(identity, Some(AuthenticatedIdentity::new("anonymous")));
        }
    }

    #[test]
    fn existing_properties_survive() {
        let mut base = Fields::new();
        base.insert("product".into(), Value::string("gate"));
        base.insert(GROUPS.into(), Value::string("stale"));

        let mut conn = connection(Mechanism::Plain, Some("bob"), base);
        IdentityStamp::default().on_open(&mut conn);

        let props = conn.local_properties();
        assert_eq!(props.get("product"), Some(&Value::string("gate")));
        assert_eq!(
            props.get(GROUPS),
            Some(&Value::List(vec![Value::string("manage")]))
        );
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn custom_groups_replace_manage() {
        let mut conn = connection(Mechanism::Plain, Some("carol"), Fields::new());
        IdentityStamp::with_groups(vec!["send".into(), "recv".into()]).on_open(&mut conn);
        assert_eq!(
            conn.local_properties().get(GROUPS),
            Some(&Value::List(vec![Value::string("send"), Value::string("recv")]))
        );
    }

    #[test]
    fn identity_value_round_trips_through_map_lookup() {
        let value = AuthenticatedIdentity::new("dave").to_value();
        assert_eq!(value.get("sub"), Some(&Value::string("dave")));
        assert_eq!(AuthenticatedIdentity::from_value(&Value::Null), None);
    }
}
