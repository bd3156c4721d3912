// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Tagged value model for template data.
//!
//! Everything that crosses the data-binding boundary (render arguments,
//! helper arguments and results, configuration values) is a [`Data`].

use crate::error::HelperError;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A helper function callable from template expressions.
pub type Helper = Arc<dyn Fn(&[Data]) -> std::result::Result<Data, HelperError> + Send + Sync>;

/// A value bound into a template.
#[derive(Clone, Default)]
pub enum Data {
    /// Absent value; renders as the empty string.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (integers are stored exactly up to 2^53).
    Number(f64),
    /// Text.
    String(String),
    /// Ordered sequence.
    List(Vec<Data>),
    /// String-keyed map, iterated in key order.
    Map(BTreeMap<String, Data>),
    /// A function value.
    Callable(Helper),
}

impl Data {
    /// Wraps a closure as a callable value.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[Data]) -> std::result::Result<Data, HelperError> + Send + Sync + 'static,
    {
        Data::Callable(Arc::new(f))
    }

    /// Builds a value from anything `serde` can serialize.
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Data::from)
    }

    /// Looks up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Data> {
        match self {
            Data::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Returns true for [`Data::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// Returns the text when this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number when this value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerces the value to output text.
    ///
    /// `Null` becomes the empty string, lists are comma-joined and maps are
    /// written as JSON.
    pub fn to_text(&self) -> String {
        match self {
            Data::Null => String::new(),
            Data::Bool(b) => b.to_string(),
            Data::Number(n) => format_number(*n),
            Data::String(s) => s.clone(),
            Data::List(items) => items
                .iter()
                .map(Data::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Data::Map(_) => serde_json::to_string(self).unwrap_or_default(),
            Data::Callable(_) => "[function]".to_string(),
        }
    }
}

/// Formats a number without a trailing `.0` for whole values.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Null => write!(f, "Null"),
            Data::Bool(b) => write!(f, "Bool({})", b),
            Data::Number(n) => write!(f, "Number({})", n),
            Data::String(s) => write!(f, "String({:?})", s),
            Data::List(items) => f.debug_list().entries(items).finish(),
            Data::Map(map) => f.debug_map().entries(map).finish(),
            Data::Callable(_) => write!(f, "Callable"),
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Null, Data::Null) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => a == b,
            (Data::String(a), Data::String(b)) => a == b,
            (Data::List(a), Data::List(b)) => a == b,
            (Data::Map(a), Data::Map(b)) => a == b,
            (Data::Callable(a), Data::Callable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Data::Null | Data::Callable(_) => serializer.serialize_unit(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Data::String(s) => serializer.serialize_str(s),
            Data::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Data::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Data::Null,
            Value::Bool(b) => Data::Bool(b),
            Value::Number(n) => Data::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Data::String(s),
            Value::Array(items) => Data::List(items.into_iter().map(Data::from).collect()),
            Value::Object(obj) => Data::Map(obj.into_iter().map(|(k, v)| (k, Data::from(v))).collect()),
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Bool(b)
    }
}

impl From<f64> for Data {
    fn from(n: f64) -> Self {
        Data::Number(n)
    }
}

impl From<i64> for Data {
    fn from(n: i64) -> Self {
        Data::Number(n as f64)
    }
}

impl From<i32> for Data {
    fn from(n: i32) -> Self {
        Data::Number(n as f64)
    }
}

impl From<usize> for Data {
    fn from(n: usize) -> Self {
        Data::Number(n as f64)
    }
}

impl<T: Into<Data>> From<Vec<T>> for Data {
    fn from(items: Vec<T>) -> Self {
        Data::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Data::Null)
    }
}

impl From<BTreeMap<String, Data>> for Data {
    fn from(map: BTreeMap<String, Data>) -> Self {
        Data::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_coercion() {
        assert_eq!(Data::Null.to_text(), "");
        assert_eq!(Data::Number(3.0).to_text(), "3");
        assert_eq!(Data::Number(2.5).to_text(), "2.5");
        assert_eq!(Data::from(vec!["a", "b"]).to_text(), "a,b");
        assert_eq!(Data::from(json!({"k": 1})).to_text(), r#"{"k":1}"#);
    }

    #[test]
    fn test_from_json_keeps_structure() {
        let data = Data::from(json!({"list": ["a", 1, true, null]}));
        let list = data.get("list").unwrap();
        assert_eq!(
            list,
            &Data::List(vec![
                Data::from("a"),
                Data::Number(1.0),
                Data::Bool(true),
                Data::Null
            ])
        );
        assert!(data.get("missing").is_none());
    }

    #[test]
    fn test_serialize_round_trips_through_json() {
        let data = Data::from(json!({"n": 4, "s": "x", "l": [1.5]}));
        let text = serde_json::to_string(&data).unwrap();
        assert_eq!(text, r#"{"l":[1.5],"n":4,"s":"x"}"#);
    }

    #[test]
    fn test_callables_compare_by_identity() {
        let f = Data::callable(|_| Ok(Data::Null));
        let g = f.clone();
        assert_eq!(f, g);
        assert_ne!(f, Data::callable(|_| Ok(Data::Null)));
    }
}
