//! Public response type delivered to subscribers.

use crate::error::QueryError;
use crate::exec::Envelope;
use serde::Serialize;
use serde_json::value::RawValue;

/// One result delivered on a subscription channel.
///
/// Serializes as `{"data": ..., "errors": [...]}` with absent parts omitted.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<QueryError>,
}

impl Response {
    pub fn from_errors(errors: Vec<QueryError>) -> Self {
        Self { data: None, errors }
    }

    /// Decode `data` into a JSON value. Absent data decodes as `null`.
    pub fn data_value(&self) -> serde_json::Result<serde_json::Value> {
        match &self.data {
            Some(raw) => serde_json::from_str(raw.get()),
            None => Ok(serde_json::Value::Null),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl From<Envelope> for Response {
    fn from(envelope: Envelope) -> Self {
        Self {
            data: envelope.data,
            errors: envelope.errors,
        }
    }
}
