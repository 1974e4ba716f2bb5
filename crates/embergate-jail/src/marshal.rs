//! Type conversions between JSON and Lua values.
//!
//! JSON `null` maps to Lua `nil` in both directions; explicit-null
//! preservation for JSON-RPC responses happens on the Rust side of the
//! bridge, where the distinction still exists.

use mlua::{Lua, Result as LuaResult, Value};

/// Converts a Lua value to JSON.
///
/// Tables with a non-zero raw length become arrays; everything else
/// becomes an object keyed by its string keys.
pub fn lua_to_json(value: Value, lua: &Lua) -> LuaResult<serde_json::Value> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        Value::Integer(i) => Ok(serde_json::Value::Number(i.into())),
        Value::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| mlua::Error::SerializeError("non-finite number".into())),
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: Value = table.raw_get(i)?;
                    items.push(lua_to_json(item, lua)?);
                }
                Ok(serde_json::Value::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                for pair in table.pairs::<String, Value>() {
                    let (key, item) = pair?;
                    map.insert(key, lua_to_json(item, lua)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        other => Err(mlua::Error::SerializeError(format!(
            "cannot serialize {} to JSON",
            other.type_name(),
        ))),
    }
}

/// Converts JSON to a Lua value. `null` becomes `nil`.
pub fn json_to_lua(lua: &Lua, json: &serde_json::Value) -> LuaResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s)?)),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}
