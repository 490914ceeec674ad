//! Session identity and context passed to every load.
//!
//! A [`Session`] carries a stable random id plus free-form scalar
//! attributes. Sources decide how to use it; the HTTP source forwards it
//! as request headers.

mod sid;


use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use sid::{describe_sid, generate_sid};

/// A scalar session attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionValue {
    /// Boolean flag
    Flag(bool),
    /// Whole number, serialized without a fractional part
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        SessionValue::Text(value.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        SessionValue::Text(value)
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        SessionValue::Flag(value)
    }
}

impl From<f64> for SessionValue {
    fn from(value: f64) -> Self {
        SessionValue::Float(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        SessionValue::Integer(value)
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        SessionValue::Integer(i64::from(value))
    }
}

/// Whether `key` names the session id rather than an attribute.
///
/// Matching ignores ASCII case since header names are case-insensitive.
pub fn is_sid_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("sid")
}

/// Identity plus context map handed to [`Source::load`](crate::source::Source::load).
///
/// The sid is fixed at construction. Attributes are kept in key order so
/// header serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    sid: String,
    #[serde(flatten)]
    attributes: BTreeMap<String, SessionValue>,
}

impl Session {
    /// Creates a session with a freshly generated sid and no attributes.
    pub fn new() -> Self {
        Self::with_sid(generate_sid())
    }

    /// Creates a session with a caller supplied sid.
    pub fn with_sid(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The session id.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Sets an attribute, returning the previous value if any.
    ///
    /// A key equal to `sid` in any letter case is ignored; the sid never
    /// changes after construction.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<SessionValue>,
    ) -> Option<SessionValue> {
        let key = key.into();
        if is_sid_key(&key) {
            warn!(key = %key, "ignoring attribute that shadows the session id");
            return None;
        }

        self.attributes.insert(key, value.into())
    }

    /// Builder form of [`Session::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SessionValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Reads an attribute.
    pub fn get(&self, key: &str) -> Option<&SessionValue> {
        self.attributes.get(key)
    }

    /// Removes an attribute.
    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        self.attributes.remove(key)
    }

    /// Iterates attributes in key order. The sid is not included, nor any
    /// deserialized attribute whose key collides with it.
    pub fn attributes(&self) -> impl Iterator<Item = (&String, &SessionValue)> {
        self.attributes.iter().filter(|(key, _)| !is_sid_key(key))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
