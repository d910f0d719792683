//! Event trait and wire encoding.
//!
//! Every message that crosses the broker is a flat JSON object. Peers are not
//! necessarily Rust services, so the encoding is plain `serde_json` with no
//! envelope and no type tag: the channel a message arrives on says what it is.
//!
//! # Example
//!
//! ```
//! use conference_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
//! struct SpeakerInvited {
//!     email: String,
//! }
//!
//! impl Event for SpeakerInvited {
//!     fn event_type(&self) -> &'static str {
//!         "SpeakerInvited"
//!     }
//! }
//!
//! let bytes = SpeakerInvited { email: "s@x.com".into() }.to_bytes().unwrap();
//! assert_eq!(bytes, br#"{"email":"s@x.com"}"#);
//! ```

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error types for event encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes (malformed JSON, missing key,
    /// wrong type, unparseable timestamp).
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// A message carried over the broker.
///
/// `event_type` is only used for logging; it is not written to the wire.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns a human-readable event type identifier.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be encoded.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] for malformed JSON, a
    /// missing key, a value of the wrong type, or an unparseable timestamp.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// ISO-8601 timestamps as produced by the identity service.
///
/// Accepts RFC 3339 (`2024-01-01T00:00:00Z`, `2024-01-01T00:00:00+02:00`),
/// offset timestamps with a space separator, naive date-times with optional
/// fractional seconds (`2024-01-01T00:00:00`, `2024-01-01 00:00:00.250`) and
/// bare dates. Naive values are taken as UTC.
///
/// Use with `#[serde(with = "conference_core::event::iso8601")]`.
pub mod iso8601 {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EventError;

    const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    /// Parse an ISO-8601 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if no accepted form matches.
    pub fn parse(value: &str) -> Result<DateTime<Utc>, EventError> {
        let value = value.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.with_timezone(&Utc));
        }
        for format in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(value, format) {
                return Ok(dt.with_timezone(&Utc));
            }
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(naive.and_utc());
            }
        }
        if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Ok(midnight.and_utc());
        }

        Err(EventError::DeserializationError(format!(
            "invalid ISO-8601 timestamp: {value:?}"
        )))
    }

    /// Serialize as RFC 3339.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    /// Deserialize from any accepted ISO-8601 form.
    ///
    /// # Errors
    ///
    /// Fails if the value is not a string or does not parse.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
