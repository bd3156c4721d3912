// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Conversions between [`Data`] and Lua values.

use crate::data::{Data, Helper};
use crate::error::HelperError;
use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};
use std::collections::BTreeMap;

/// Metatable field recording the length of a list that holds `nil` items.
const LIST_LENGTH: &str = "__n";

/// Converts a data value into a Lua value.
///
/// Lists become 1-based sequence tables, maps become tables with string
/// keys, and callables become Lua functions. A list holding nulls keeps its
/// length in its metatable; read it back with [`list_len`].
pub fn data_to_lua(lua: &Lua, data: &Data) -> LuaResult<Value> {
    Ok(match data {
        Data::Null => Value::Nil,
        Data::Bool(b) => Value::Boolean(*b),
        Data::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                Value::Integer(*n as i64)
            } else {
                Value::Number(*n)
            }
        }
        Data::String(s) => Value::String(lua.create_string(s)?),
        Data::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, data_to_lua(lua, item)?)?;
            }
            if items.iter().any(Data::is_null) {
                let meta = lua.create_table()?;
                meta.raw_set(LIST_LENGTH, items.len())?;
                let setmetatable: Function = lua.globals().get("setmetatable")?;
                let _: Table = setmetatable.call((table.clone(), meta))?;
            }
            Value::Table(table)
        }
        Data::Map(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.raw_set(k.as_str(), data_to_lua(lua, v)?)?;
            }
            Value::Table(table)
        }
        Data::Callable(helper) => Value::Function(helper_to_lua(lua, helper.clone())?),
    })
}

/// Converts a Lua value into a data value.
///
/// Tables whose keys are exactly `1..n` become lists; other tables become
/// maps keyed by the string form of their keys. Functions and userdata
/// have no data form and become [`Data::Null`].
pub fn lua_to_data(value: &Value) -> Data {
    match value {
        Value::Nil => Data::Null,
        Value::Boolean(b) => Data::Bool(*b),
        Value::Integer(i) => Data::Number(*i as f64),
        Value::Number(n) => Data::Number(*n),
        Value::String(s) => Data::String(s.to_string_lossy().to_string()),
        Value::Table(table) => table_to_data(table),
        _ => Data::Null,
    }
}

/// Sequence length of `table`: the recorded length of a list with `nil`
/// items, else the raw border.
pub fn list_len(table: &Table) -> usize {
    recorded_len(table).unwrap_or_else(|| table.raw_len())
}

fn recorded_len(table: &Table) -> Option<usize> {
    let meta = table.metatable()?;
    let len: Option<usize> = meta.raw_get(LIST_LENGTH).ok()?;
    len
}

fn table_to_data(table: &Table) -> Data {
    if let Some(len) = recorded_len(table) {
        return Data::List(
            (1..=len)
                .map(|i| {
                    let item: Value = table.raw_get(i).unwrap_or(Value::Nil);
                    lua_to_data(&item)
                })
                .collect(),
        );
    }

    let mut entries: Vec<(Value, Value)> = table.clone().pairs::<Value, Value>().flatten().collect();

    let len = table.raw_len();
    if entries.is_empty() || (len > 0 && entries.len() == len) {
        entries.sort_by_key(|(k, _)| match k {
            Value::Integer(i) => *i,
            _ => i64::MAX,
        });
        if entries.iter().enumerate().all(|(i, (k, _))| matches!(k, Value::Integer(n) if *n == i as i64 + 1)) {
            return Data::List(entries.iter().map(|(_, v)| lua_to_data(v)).collect());
        }
    }

    let map: BTreeMap<String, Data> = entries
        .iter()
        .filter_map(|(k, v)| key_text(k).map(|k| (k, lua_to_data(v))))
        .collect();
    Data::Map(map)
}

/// String form of a table key, if it has one.
pub fn key_text(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.to_string_lossy().to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(crate::data::format_number(*n)),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Wraps a helper as a Lua function.
pub fn helper_to_lua(lua: &Lua, helper: Helper) -> LuaResult<mlua::Function> {
    lua.create_function(move |lua, args: MultiValue| {
        let args: Vec<Data> = args.iter().map(lua_to_data).collect();
        match helper(&args) {
            Ok(result) => data_to_lua(lua, &result),
            Err(HelperError::Failed(message)) => Err(mlua::Error::runtime(message)),
            Err(HelperError::Body(fault)) => Err(mlua::Error::runtime(fault.message)),
        }
    })
}

/// Output text of a Lua value; `nil` is the empty string.
pub fn lua_text(value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Function(_) => "[function]".to_string(),
        other => lua_to_data(other).to_text(),
    }
}

/// Lua truthiness: only `nil` and `false` are false.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_round_trip_structure() {
        let lua = Lua::new();
        let data = Data::from(json!({"list": [1, "two", false], "nested": {"x": 1.5}, "empty": []}));
        let value = data_to_lua(&lua, &data).unwrap();
        assert_eq!(lua_to_data(&value), data);
    }

    #[test]
    fn test_lists_with_nulls_keep_their_length() {
        let lua = Lua::new();
        let data = Data::from(json!([null, "x", null]));
        let Value::Table(table) = data_to_lua(&lua, &data).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(list_len(&table), 3);
        assert_eq!(lua_to_data(&Value::Table(table)), data);

        let Value::Table(plain) = data_to_lua(&lua, &Data::from(json!(["a", "b"]))).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(list_len(&plain), 2);
    }

    #[test]
    fn test_sparse_tables_become_maps() {
        let lua = Lua::new();
        let table: Table = lua.load("return { [1] = 'a', [3] = 'c' }").eval().unwrap();
        let data = lua_to_data(&Value::Table(table));
        let expected = Data::from(json!({"1": "a", "3": "c"}));
        assert_eq!(data, expected);
    }

    #[test]
    fn test_text_and_truthiness() {
        let lua = Lua::new();
        assert_eq!(lua_text(&Value::Nil), "");
        assert_eq!(lua_text(&Value::Integer(7)), "7");
        assert_eq!(lua_text(&Value::Number(0.5)), "0.5");
        assert_eq!(lua_text(&Value::String(lua.create_string("s").unwrap())), "s");
        assert!(is_truthy(&Value::Integer(0)));
        assert!(!is_truthy(&Value::Nil));
        assert!(!is_truthy(&Value::Boolean(false)));
    }

    #[test]
    fn test_helpers_are_callable_from_lua() {
        let lua = Lua::new();
        let helper: Helper = Arc::new(|args: &[Data]| {
            let total: f64 = args.iter().filter_map(Data::as_f64).sum();
            Ok(Data::Number(total))
        });
        lua.globals().set("sum", helper_to_lua(&lua, helper).unwrap()).unwrap();
        let result: i64 = lua.load("return sum(1, 2, 3)").eval().unwrap();
        assert_eq!(result, 6);
    }

    #[test]
    fn test_helper_failures_raise_lua_errors() {
        let lua = Lua::new();
        let helper: Helper = Arc::new(|_: &[Data]| Err(HelperError::failed("nope")));
        lua.globals().set("bad", helper_to_lua(&lua, helper).unwrap()).unwrap();
        let err = lua.load("return bad()").eval::<Value>().unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
