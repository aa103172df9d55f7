//! IPLD to JSON conversion for display
//!
//! Follows DAG-JSON conventions for links and bytes. Integers that do not fit
//! a 64-bit JSON number are rendered as decimal strings.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use ipld_core::ipld::Ipld;
use serde_json::{json, Value};

/// Convert an IPLD value into a JSON value
pub fn to_json(value: &Ipld) -> Value {
    match value {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(*b),
        Ipld::Integer(i) => i64::try_from(*i)
            .map(Value::from)
            .or_else(|_| u64::try_from(*i).map(Value::from))
            .unwrap_or_else(|_| Value::String(i.to_string())),
        Ipld::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ipld::String(s) => Value::String(s.clone()),
        Ipld::Bytes(bytes) => json!({ "/": { "bytes": STANDARD_NO_PAD.encode(bytes) } }),
        Ipld::List(items) => Value::Array(items.iter().map(to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), to_json(value)))
                .collect(),
        ),
        Ipld::Link(cid) => json!({ "/": cid.to_string() }),
    }
}
