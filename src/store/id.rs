// Id allocation module
// Strategies for assigning identifiers to new records and parsing path ids

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use super::record::{Record, ID_FIELD};

/// How new record ids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Numeric, one more than the largest existing numeric id
    #[default]
    Sequential,
    /// Numeric, Unix time in milliseconds
    Timestamp,
    /// String, Unix time in milliseconds rendered as decimal text
    Token,
}

/// A record identifier as it appears in the `id` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Number(u64),
    Text(String),
}

impl RecordId {
    /// Whether a stored `id` value equals this id. Comparison is type-strict:
    /// `7` never matches `"7"`.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::Number(n), Some(Value::Number(v))) => v.as_u64() == Some(*n),
            (Self::Text(s), Some(Value::String(v))) => v == s,
            _ => false,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl IdStrategy {
    /// Parse a path segment into an id of this strategy's type.
    ///
    /// Returns `None` when the segment can never match a stored id
    /// (a non-numeric segment under a numeric strategy).
    pub fn parse(self, segment: &str) -> Option<RecordId> {
        match self {
            Self::Sequential | Self::Timestamp => segment.parse().ok().map(RecordId::Number),
            Self::Token => Some(RecordId::Text(segment.to_string())),
        }
    }

    /// Choose an id not used by any record in `records`.
    ///
    /// Returns `None` when the next id would overflow `u64`.
    pub fn allocate(self, records: &[Record]) -> Option<RecordId> {
        self.allocate_at(records, now_millis())
    }

    fn allocate_at(self, records: &[Record], now: u64) -> Option<RecordId> {
        match self {
            Self::Sequential => match max_numeric_id(records) {
                Some(max) => max.checked_add(1).map(RecordId::Number),
                None => Some(RecordId::Number(1)),
            },
            Self::Timestamp => match max_numeric_id(records) {
                Some(max) if max >= now => max.checked_add(1).map(RecordId::Number),
                _ => Some(RecordId::Number(now)),
            },
            Self::Token => {
                let taken: HashSet<&str> = records
                    .iter()
                    .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_str))
                    .collect();
                let mut candidate = now;
                while taken.contains(candidate.to_string().as_str()) {
                    candidate = candidate.checked_add(1)?;
                }
                Some(RecordId::Text(candidate.to_string()))
            }
        }
    }
}

fn max_numeric_id(records: &[Record]) -> Option<u64> {
    records
        .iter()
        .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_u64))
        .max()
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
