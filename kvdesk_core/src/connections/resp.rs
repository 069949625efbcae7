//! Reply values handed back by a [`StoreClient`](super::StoreClient).
//!
//! Real connections decode with the `redis` crate and convert its
//! `redis::Value` into this RESP2-shaped enum, so callers and test doubles
//! never depend on the wire library.

use super::errors::ConnectionError;

/// One decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Lossy text view of a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            RespValue::Bulk(Some(_)) | RespValue::Simple(_) => self.as_text()?.parse().ok(),
            _ => None,
        }
    }

    /// Turn an error reply into `Err`, pass everything else through.
    pub fn into_result(self) -> Result<RespValue, ConnectionError> {
        match self {
            RespValue::Error(msg) => Err(ConnectionError::Server(msg)),
            other => Ok(other),
        }
    }
}

/// RESP3-only shapes are folded into their closest RESP2 form.
impl From<redis::Value> for RespValue {
    fn from(value: redis::Value) -> Self {
        match value {
            redis::Value::Nil => RespValue::Bulk(None),
            redis::Value::Int(n) => RespValue::Integer(n),
            redis::Value::BulkString(bytes) => RespValue::Bulk(Some(bytes)),
            redis::Value::Array(items) | redis::Value::Set(items) => {
                RespValue::Array(Some(items.into_iter().map(RespValue::from).collect()))
            }
            redis::Value::Map(pairs) => RespValue::Array(Some(
                pairs
                    .into_iter()
                    .flat_map(|(k, v)| [RespValue::from(k), RespValue::from(v)])
                    .collect(),
            )),
            redis::Value::SimpleString(s) => RespValue::Simple(s),
            redis::Value::Okay => RespValue::Simple("OK".into()),
            redis::Value::Double(d) => RespValue::Simple(d.to_string()),
            redis::Value::Boolean(b) => RespValue::Integer(i64::from(b)),
            redis::Value::VerbatimString { text, .. } => RespValue::Bulk(Some(text.into_bytes())),
            redis::Value::Attribute { data, .. } => RespValue::from(*data),
            redis::Value::ServerError(err) => RespValue::Error(match err.details() {
                Some(details) => format!("{} {}", err.code(), details),
                None => err.code().to_string(),
            }),
            other => RespValue::Simple(format!("{other:?}")),
        }
    }
}
