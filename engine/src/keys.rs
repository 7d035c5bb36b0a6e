//! Primary key generation.

use crate::schema::FieldType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static LAST_NUMERIC: AtomicU64 = AtomicU64::new(0);

/// Strategy for generating missing primary key values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyGenerator {
    /// UUID v4 strings from the system's secure random source
    #[default]
    Random,
    /// Time-ordered keys for targets without a secure random source
    Timestamp,
}

impl std::str::FromStr for KeyGenerator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" | "uuid" => Ok(KeyGenerator::Random),
            "timestamp" => Ok(KeyGenerator::Timestamp),
            other => Err(format!("unknown key strategy: {}", other)),
        }
    }
}

impl KeyGenerator {
    /// Generate a key suited to a field of the given type.
    ///
    /// Numeric fields always receive numeric keys so that generated records
    /// still pass type validation.
    pub fn generate(&self, field_type: &FieldType) -> Value {
        if *field_type == FieldType::Number {
            return Value::from(numeric_key());
        }
        match self {
            KeyGenerator::Random => Value::String(uuid::Uuid::new_v4().to_string()),
            KeyGenerator::Timestamp => Value::String(timestamp_key()),
        }
    }
}

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Millisecond timestamp scaled by 1000, bumped past the last key issued.
///
/// Strictly increasing within the process even when more than 1000 keys are
/// drawn in one millisecond. Stays below 2^53 until the year 2255, so the key
/// survives a trip through any double-precision JSON consumer.
fn numeric_key() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64 * 1000;
    let next = |last: u64| now.max(last.saturating_add(1));
    match LAST_NUMERIC.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last))) {
        Ok(last) | Err(last) => next(last),
    }
}

fn timestamp_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    format!("{:011x}-{:06x}", millis, next_sequence() & 0xff_ffff)
}
