//! Conversions between record JSON values and SQLite values.
//!
//! Structured values (lists, maps) are stored as canonical JSON text and
//! booleans as 0/1, so a value compares equal to its stored form exactly when
//! it would round-trip unchanged.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Row;
use serde_json::{Map, Number, Value};

/// Columns holding JSON text.
const STRUCTURED_COLUMNS: &[&str] = &[
    "networks",
    "ports",
    "environment_vars",
    "labels",
    "options",
    "network_config",
];

/// Columns holding 0/1 flags.
const FLAG_COLUMNS: &[&str] = &["unprivileged", "auto_start", "nesting", "internal", "attachable"];

pub(crate) fn to_sql(value: &Value) -> Result<SqlValue, serde_json::Error> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

/// Decodes one column back into JSON, restoring structure and flags.
pub(crate) fn from_sql(column: &str, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if FLAG_COLUMNS.contains(&column) => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if STRUCTURED_COLUMNS.contains(&column) {
                if let Ok(parsed) = serde_json::from_str(&text) {
                    return parsed;
                }
            }
            Value::String(text.into_owned())
        }
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

/// A whole row as a JSON object keyed by column name.
pub(crate) fn row_to_json(row: &Row<'_>) -> rusqlite::Result<Map<String, Value>> {
    let stmt = row.as_ref();
    let mut map = Map::new();
    for (idx, name) in stmt.column_names().into_iter().enumerate() {
        map.insert(name.to_owned(), from_sql(name, row.get_ref(idx)?));
    }
    Ok(map)
}

/// Decodes a structured column into a list, treating NULL or junk as empty.
pub(crate) fn string_list(row: &Row<'_>, column: &str) -> rusqlite::Result<Vec<String>> {
    match from_sql(column, row.get_ref(column)?) {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

pub(crate) fn flag(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<bool>> {
    Ok(row.get::<_, Option<i64>>(column)?.map(|v| v != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_become_integers() {
        assert_eq!(to_sql(&json!(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(false)).unwrap(), SqlValue::Integer(0));
    }

    #[test]
    fn structures_become_canonical_json_text() {
        assert_eq!(
            to_sql(&json!({"a": "1", "b": "2"})).unwrap(),
            SqlValue::Text(r#"{"a":"1","b":"2"}"#.into())
        );
        assert_eq!(
            to_sql(&json!(["80:80"])).unwrap(),
            SqlValue::Text(r#"["80:80"]"#.into())
        );
    }

    #[test]
    fn structured_text_decodes_only_for_structured_columns() {
        let text = ValueRef::Text(br#"["a","b"]"#);
        assert_eq!(from_sql("ports", text), json!(["a", "b"]));
        assert_eq!(from_sql("purpose", text), json!(r#"["a","b"]"#));
    }

    #[test]
    fn flags_and_blobs_decode() {
        assert_eq!(from_sql("nesting", ValueRef::Integer(1)), json!(true));
        assert_eq!(from_sql("cpu_cores", ValueRef::Integer(1)), json!(1));
        assert_eq!(from_sql("x", ValueRef::Blob(&[0xde, 0xad])), json!("dead"));
    }
}
