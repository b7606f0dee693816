//! # Data Model
//!
//! Records, change events, jobs and tracked symbols, plus validation of
//! incoming write requests.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{QuoteError, QuoteResult};

/// Longest key accepted by [`validate_write`].
pub const MAX_KEY_LEN: usize = 256;

/// One row of the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

/// Notification emitted once per successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub value: String,
    /// Commit time, Unix epoch milliseconds.
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

impl ChangeEvent {
    /// Builds an event stamped with the current wall-clock time.
    pub fn now(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

/// Whether a commit inserted a new record or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    Created,
    Updated,
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Created => write!(f, "Created new record"),
            CommitOutcome::Updated => write!(f, "Updated existing record"),
        }
    }
}

/// A queued write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub key: String,
    pub value: String,
    /// Enqueue time, Unix epoch milliseconds.
    #[serde(rename = "enqueueTime")]
    pub enqueue_time: i64,
    /// Deliveries so far, including the one currently leased.
    #[serde(default)]
    pub attempts: u32,
}

impl Job {
    /// Creates a fresh job with a random id and zero attempts.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.into(),
            value: value.into(),
            enqueue_time: Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }
}

/// A job that exhausted its attempts, kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub job: Job,
    pub reason: String,
    /// Unix epoch milliseconds.
    #[serde(rename = "failedAt")]
    pub failed_at: i64,
}

/// A symbol refreshed by the price poller. `name` is the stored key, `symbol`
/// is what the feed understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSymbol {
    pub name: String,
    pub symbol: String,
}

impl TrackedSymbol {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
        }
    }

    /// The metals and coins the service tracks out of the box.
    pub fn defaults() -> Vec<TrackedSymbol> {
        [
            ("Silver", "XAG"),
            ("Gold", "XAU"),
            ("Bitcoin", "BTC"),
            ("Ethereum", "ETH"),
            ("Palladium", "XPD"),
            ("Copper", "HG"),
        ]
        .into_iter()
        .map(|(name, symbol)| TrackedSymbol::new(name, symbol))
        .collect()
    }

    /// Parses a comma separated `Name:SYM` list, e.g. `Gold:XAU,Silver:XAG`.
    pub fn parse_list(raw: &str) -> QuoteResult<Vec<TrackedSymbol>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(TrackedSymbol::from_str)
            .collect()
    }
}

impl FromStr for TrackedSymbol {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, symbol)) if !name.trim().is_empty() && !symbol.trim().is_empty() => {
                Ok(TrackedSymbol::new(name.trim(), symbol.trim()))
            }
            _ => Err(QuoteError::Validation(format!(
                "tracked symbol '{}' must look like Name:SYMBOL",
                s
            ))),
        }
    }
}

/// Body of a write request as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

impl WriteRequest {
    /// Validates and normalizes the request into a `(key, value)` pair.
    pub fn validate(&self) -> QuoteResult<(String, String)> {
        validate_write(&self.key, &self.value)
    }
}

/// Checks a raw `(key, value)` pair.
///
/// The key must be a non-empty string of at most [`MAX_KEY_LEN`] characters
/// with no surrounding whitespace. The value may be a string, number or
/// boolean; non-string scalars are stored as their text form.
pub fn validate_write(key: &Value, value: &Value) -> QuoteResult<(String, String)> {
    let key = match key {
        Value::String(k) => k,
        Value::Null => return Err(QuoteError::Validation("missing field 'key'".into())),
        _ => return Err(QuoteError::Validation("'key' must be a string".into())),
    };
    if key.is_empty() {
        return Err(QuoteError::Validation("'key' must not be empty".into()));
    }
    if key.trim() != key {
        return Err(QuoteError::Validation(
            "'key' must not start or end with whitespace".into(),
        ));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(QuoteError::Validation(format!(
            "'key' longer than {} characters",
            MAX_KEY_LEN
        )));
    }

    let value = match value {
        Value::String(v) => v.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return Err(QuoteError::Validation("missing field 'value'".into())),
        _ => {
            return Err(QuoteError::Validation(
                "'value' must be a string, number or boolean".into(),
            ))
        }
    };

    Ok((key.clone(), value))
}
