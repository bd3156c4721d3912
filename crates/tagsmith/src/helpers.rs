// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Standard helper set.
//!
//! Installed by [`Compiler::with_standard_helpers`](crate::Compiler::with_standard_helpers).
//! All of them work on the coerced text of their argument, so they can be
//! chained with pipes: `{{= title | trim | upper}}`.

use crate::data::{Data, Helper};
use crate::error::HelperError;
use std::sync::Arc;

/// The standard helpers by name.
pub fn standard_helpers() -> Vec<(&'static str, Helper)> {
    vec![
        ("upper", text_helper(|s| s.to_uppercase())),
        ("lower", text_helper(|s| s.to_lowercase())),
        ("trim", text_helper(|s| s.trim().to_string())),
        ("default", Arc::new(default)),
        ("json", Arc::new(json)),
        ("join", Arc::new(join)),
        ("length", Arc::new(length)),
    ]
}

fn text_helper(f: fn(&str) -> String) -> Helper {
    Arc::new(move |args: &[Data]| {
        let text = args.first().map(Data::to_text).unwrap_or_default();
        Ok(Data::String(f(&text)))
    })
}

/// First argument unless it is null or empty, else the second.
fn default(args: &[Data]) -> Result<Data, HelperError> {
    let value = args.first().cloned().unwrap_or_default();
    let empty = match &value {
        Data::Null => true,
        Data::String(s) => s.is_empty(),
        _ => false,
    };
    if empty {
        Ok(args.get(1).cloned().unwrap_or_default())
    } else {
        Ok(value)
    }
}

fn json(args: &[Data]) -> Result<Data, HelperError> {
    let value = args.first().cloned().unwrap_or_default();
    serde_json::to_string(&value)
        .map(Data::String)
        .map_err(|e| HelperError::failed(format!("json: {}", e)))
}

/// `join(list, separator)`; the separator defaults to `,`.
fn join(args: &[Data]) -> Result<Data, HelperError> {
    let separator = args.get(1).map(Data::to_text).unwrap_or_else(|| ",".to_string());
    match args.first() {
        Some(Data::List(items)) => Ok(Data::String(
            items.iter().map(Data::to_text).collect::<Vec<_>>().join(&separator),
        )),
        Some(Data::Map(map)) => Ok(Data::String(
            map.values().map(Data::to_text).collect::<Vec<_>>().join(&separator),
        )),
        Some(Data::Null) | None => Ok(Data::String(String::new())),
        Some(other) => Err(HelperError::failed(format!("join: expected a list, got {:?}", other))),
    }
}

fn length(args: &[Data]) -> Result<Data, HelperError> {
    let n = match args.first() {
        Some(Data::List(items)) => items.len(),
        Some(Data::Map(map)) => map.len(),
        Some(Data::String(s)) => s.chars().count(),
        Some(Data::Null) | None => 0,
        Some(other) => other.to_text().chars().count(),
    };
    Ok(Data::from(n))
}
