//! Entity identifier generation
//!
//! Callers pick the cheapest strategy that matches the identity semantics
//! of their entity: content-addressed ids collapse identical records,
//! random and timestamp ids do not.

use crate::storage::{Result, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a store derives ids for new entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdStrategy {
    /// djb2 over the named fields, or the whole value when `fields` is None
    Hash { fields: Option<Vec<String>> },
    /// Random v4 UUID
    #[default]
    Uuid,
    /// Current time in milliseconds, base 36. Not collision-free.
    Timestamp,
    /// Read the id from a field of the record itself
    Provided { field: String },
}

impl IdStrategy {
    /// Hash strategy over a subset of fields
    pub fn hash_of(fields: &[&str]) -> Self {
        IdStrategy::Hash {
            fields: Some(fields.iter().map(|f| f.to_string()).collect()),
        }
    }
}

/// djb2 over raw bytes
pub fn djb2(data: &[u8]) -> u32 {
    data.iter()
        .fold(5381u32, |h, &b| h.wrapping_mul(33).wrapping_add(b as u32))
}

/// Serialize with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for k in keys {
                    out.insert(k.clone(), sorted(&map[k]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn hash_id(fields: Option<&[String]>, data: &Value) -> String {
    let text = match fields {
        Some(fields) => {
            // Field order is part of the identity, so no key sorting here
            let parts: Vec<String> = fields
                .iter()
                .map(|f| {
                    let v = data.get(f).unwrap_or(&Value::Null);
                    format!("{}={}", f, canonical_json(v))
                })
                .collect();
            parts.join("|")
        }
        None => canonical_json(data),
    };
    format!("{:08x}", djb2(text.as_bytes()))
}

/// Derive an id for `data` according to `strategy`
pub fn generate_id(strategy: &IdStrategy, data: &Value) -> Result<String> {
    match strategy {
        IdStrategy::Hash { fields } => Ok(hash_id(fields.as_deref(), data)),
        IdStrategy::Uuid => Ok(uuid::Uuid::new_v4().to_string()),
        IdStrategy::Timestamp => {
            let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
            Ok(to_base36(millis))
        }
        IdStrategy::Provided { field } => match data.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StorageError::InvalidInput(format!(
                "record has no usable '{}' field for its id",
                field
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2(b""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(djb2(b"a"), 177670);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_hash_ignores_unselected_fields() {
        let strategy = IdStrategy::hash_of(&["lat", "lon"]);
        let a = json!({"lat": 1.5, "lon": 2.5, "name": "home"});
        let b = json!({"lat": 1.5, "lon": 2.5, "name": "house"});
        let c = json!({"lat": 1.5, "lon": 2.6, "name": "home"});
        let id_a = generate_id(&strategy, &a).unwrap();
        assert_eq!(id_a, generate_id(&strategy, &b).unwrap());
        assert_ne!(id_a, generate_id(&strategy, &c).unwrap());
        assert_eq!(id_a.len(), 8);
    }

    #[test]
    fn test_whole_value_hash_is_key_order_independent() {
        let strategy = IdStrategy::Hash { fields: None };
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"b": 2, "a": 1}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"a": 1, "b": 2}, "x": 1}"#).unwrap();
        assert_eq!(
            generate_id(&strategy, &a).unwrap(),
            generate_id(&strategy, &b).unwrap()
        );
    }

    #[test]
    fn test_uuid_strategy() {
        let a = generate_id(&IdStrategy::Uuid, &json!({})).unwrap();
        let b = generate_id(&IdStrategy::Uuid, &json!({})).unwrap();
        assert_eq!(a.len(), 36);
        assert_eq!(a.chars().nth(14), Some('4'));
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_strategy() {
        let id = generate_id(&IdStrategy::Timestamp, &json!(null)).unwrap();
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_provided_strategy() {
        let strategy = IdStrategy::Provided { field: "id".to_string() };
        assert_eq!(generate_id(&strategy, &json!({"id": "abc"})).unwrap(), "abc");
        assert_eq!(generate_id(&strategy, &json!({"id": 42})).unwrap(), "42");
        assert!(matches!(
            generate_id(&strategy, &json!({"id": ""})),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_id(&strategy, &json!({})),
            Err(StorageError::InvalidInput(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(lat in -90.0f64..90.0, lon in -180.0f64..180.0, tz in "[A-Za-z/_]{1,20}") {
            let strategy = IdStrategy::hash_of(&["lat", "lon", "tz"]);
            let data = json!({"lat": lat, "lon": lon, "tz": tz});
            prop_assert_eq!(
                generate_id(&strategy, &data).unwrap(),
                generate_id(&strategy, &data.clone()).unwrap()
            );
        }
    }
}
