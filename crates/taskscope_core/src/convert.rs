//! Re-encodes a semantic edit in the representation of a previously observed sample.

use crate::temporal::{MILLIS_THRESHOLD, iso_date};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use time::Date;

const CLOSED_TOKENS: [&str; 4] = ["DONE", "COMPLETED", "COMPLETE", "CLOSED"];
const OPEN_TOKENS: [&str; 5] = ["OPEN", "PENDING", "TODAY", "OVERDUE", "TODO"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Number,
    String,
    Other,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            _ => Self::Other,
        }
    }
}

pub fn is_closed_token(raw: &str) -> bool {
    let upper = raw.trim().to_uppercase();
    CLOSED_TOKENS.contains(&upper.as_str())
}

fn is_open_token(raw: &str) -> bool {
    let upper = raw.trim().to_uppercase();
    OPEN_TOKENS.contains(&upper.as_str())
}

fn midnight_utc_seconds(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp()
}

fn iso_midnight(date: Date) -> String {
    format!("{}T00:00:00.000Z", iso_date(date))
}

/// Encodes `date` (or its absence) the way `sample` was encoded.
pub fn convert_due_date(sample: &Value, date: Option<Date>) -> Value {
    let Some(date) = date else {
        return if sample.is_null() {
            Value::Null
        } else {
            Value::String(String::new())
        };
    };

    let seconds = midnight_utc_seconds(date);
    match sample {
        Value::Number(number) => {
            let millis = number.as_f64().is_some_and(|raw| raw >= MILLIS_THRESHOLD);
            Value::Number(Number::from(if millis { seconds * 1000 } else { seconds }))
        }
        Value::String(raw) => {
            let trimmed = raw.trim();
            if !trimmed.is_empty() && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
                let millis = trimmed
                    .parse::<f64>()
                    .is_ok_and(|parsed| parsed >= MILLIS_THRESHOLD);
                let encoded = if millis { seconds * 1000 } else { seconds };
                Value::String(encoded.to_string())
            } else if trimmed.contains('T') {
                Value::String(iso_midnight(date))
            } else {
                Value::String(iso_date(date))
            }
        }
        _ => Value::String(iso_midnight(date)),
    }
}

/// Encodes a completion state the way `sample` was encoded.
pub fn convert_done(sample: &Value, done: bool) -> Value {
    match sample {
        Value::Bool(_) => Value::Bool(done),
        Value::Number(_) => Value::Number(Number::from(u8::from(done))),
        Value::String(raw) => {
            if is_closed_token(raw) {
                if done {
                    sample.clone()
                } else {
                    Value::String("OPEN".to_string())
                }
            } else if is_open_token(raw) {
                if done {
                    Value::String("DONE".to_string())
                } else {
                    sample.clone()
                }
            } else if raw.trim().eq_ignore_ascii_case("true")
                || raw.trim().eq_ignore_ascii_case("false")
            {
                Value::String(done.to_string())
            } else if done {
                Value::String("DONE".to_string())
            } else {
                sample.clone()
            }
        }
        _ => Value::Bool(done),
    }
}
