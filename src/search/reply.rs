//! Search Reply Decoding
//!
//! `FT.SEARCH` answers with a flat array:
//!
//! ```text
//! [total, key1, [field, value, ...], key2, [field, value, ...], ...]
//! ```
//!
//! The decoder checks that shape exactly and turns each row's `"$"` field
//! (the whole JSON document) into a [`WorldInstance`].

use crate::domain::instance::WorldInstance;
use crate::error::{Error, Result};
use redis::Value;
use std::collections::HashMap;

/// Field holding the full JSON document in a search row
pub const DOCUMENT_FIELD: &str = "$";

/// One decoded `(key, fields)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    pub key: String,
    pub fields: HashMap<String, String>,
}

impl SearchRow {
    /// Parse the full document carried in the row
    pub fn document(&self) -> Result<WorldInstance> {
        let raw = self.fields.get(DOCUMENT_FIELD).ok_or_else(|| {
            Error::Protocol(format!("row {} has no {:?} field", self.key, DOCUMENT_FIELD))
        })?;
        serde_json::from_str(raw).map_err(|e| {
            Error::Protocol(format!("row {} holds an invalid document: {}", self.key, e))
        })
    }
}

/// Decoded search reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReply {
    /// Total matches reported by the index
    pub total: u64,
    pub rows: Vec<SearchRow>,
}

impl SearchReply {
    /// Decode a raw reply.
    ///
    /// `limit` is the `LIMIT 0 <limit>` the query was sent with; the reply
    /// must carry exactly `min(total, limit)` rows. `query` is only used in
    /// the `NoResults` error.
    pub fn decode(value: &Value, limit: usize, query: &str) -> Result<Self> {
        let items = match value {
            Value::Bulk(items) => items,
            other => {
                return Err(Error::Protocol(format!(
                    "expected array reply, got {}",
                    describe(other)
                )))
            }
        };

        let (head, rest) = items
            .split_first()
            .ok_or_else(|| Error::Protocol("empty search reply".into()))?;

        let total = match head {
            Value::Int(n) if *n >= 0 => *n as u64,
            other => {
                return Err(Error::Protocol(format!(
                    "expected non-negative result count, got {}",
                    describe(other)
                )))
            }
        };

        if total == 0 {
            return Err(Error::NoResults {
                query: query.to_string(),
            });
        }

        let expected = (total as usize).min(limit);
        if rest.len() != expected * 2 {
            return Err(Error::Protocol(format!(
                "reply announces {} rows but carries {} elements (expected {})",
                expected,
                rest.len(),
                expected * 2
            )));
        }

        let rows = rest
            .chunks_exact(2)
            .map(|pair| {
                Ok(SearchRow {
                    key: as_string(&pair[0])?,
                    fields: as_field_map(&pair[1])?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { total, rows })
    }

    /// Parse every row's document
    pub fn into_instances(self) -> Result<Vec<WorldInstance>> {
        self.rows.iter().map(SearchRow::document).collect()
    }
}

fn as_string(value: &Value) -> Result<String> {
    match value {
        Value::Data(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| Error::Protocol(format!("non-UTF-8 string in reply: {}", e))),
        Value::Status(s) => Ok(s.clone()),
        other => Err(Error::Protocol(format!(
            "expected string, got {}",
            describe(other)
        ))),
    }
}

fn as_field_map(value: &Value) -> Result<HashMap<String, String>> {
    let items = match value {
        Value::Bulk(items) => items,
        other => {
            return Err(Error::Protocol(format!(
                "expected field list, got {}",
                describe(other)
            )))
        }
    };

    if items.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "field list has odd length {}",
            items.len()
        )));
    }

    items
        .chunks_exact(2)
        .map(|kv| Ok((as_string(&kv[0])?, as_string(&kv[1])?)))
        .collect()
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Int(_) => "integer",
        Value::Data(_) => "bulk string",
        Value::Bulk(_) => "array",
        Value::Status(_) => "status",
        Value::Okay => "OK",
        #[allow(unreachable_patterns)]
        _ => "unsupported value",
    }
}
