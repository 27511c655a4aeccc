//! Tolerant JSON reader for EXPLAIN (FORMAT JSON) output
//!
//! PostgreSQL can emit the same key several times at one object level: a
//! plan converted from text form carries one `"Worker"` entry per worker
//! attribute block. Standard JSON parsing keeps the last value and silently
//! drops the rest, so this reader walks the document in streaming fashion
//! and deep-merges colliding keys instead: objects merge recursively,
//! arrays concatenate, scalars take the newer value.

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde_json::map::Entry;
use serde_json::{Map, Number, Value};
use std::fmt;

/// Parses a complete JSON document, merging duplicate object keys.
///
/// Syntax errors are the underlying `serde_json` diagnostics, position
/// included.
pub(crate) fn parse_tolerant(input: &str) -> Result<Value, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_str(input);
    let value = MergingValue.deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

/// Unwraps the EXPLAIN envelope: a non-empty top-level array stands for a
/// single-statement explain and yields its first element.
pub(crate) fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Array(items) if !items.is_empty() => {
            items.into_iter().next().unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Seed deserializing any JSON value with duplicate-key merging
struct MergingValue;

impl<'de> DeserializeSeed<'de> for MergingValue {
    type Value = Value;

    fn deserialize<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(MergingVisitor)
    }
}

struct MergingVisitor;

impl<'de> Visitor<'de> for MergingVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(MergingValue)? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(MergingValue)?;
            match object.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let merged = deep_merge(existing.take(), value);
                    *existing = merged;
                }
            }
        }
        Ok(Value::Object(object))
    }
}

/// Merge policy for colliding keys: objects merge key by key, arrays
/// concatenate, anything else resolves to the newer value.
fn deep_merge(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                    Entry::Occupied(mut slot) => {
                        let current = slot.get_mut();
                        let merged = deep_merge(current.take(), value);
                        *current = merged;
                    }
                }
            }
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Array(tail)) => {
            base.extend(tail);
            Value::Array(base)
        }
        (_, incoming) => incoming,
    }
}
