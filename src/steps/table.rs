//! `key | value` tables decoded into typed option structs
//!
//! An option struct lists its recognised keys in [`TableOptions::FIELDS`],
//! each with the parser for its value. Rows are folded into a JSON object
//! and handed to serde, so the struct itself only needs
//! `#[serde(rename_all = "kebab-case", default)]`.
//!
//! Nested options take either three cells (`| env | NAME | value |`) or two
//! cells with an `=` (`| env | NAME=value |`).

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Rows of cells following a step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply `f` to every cell
    pub fn map_cells(&self, f: impl Fn(&str) -> String) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().map(|cell| f(cell)).collect())
                .collect(),
        }
    }
}

impl<const R: usize, const C: usize> From<[[&str; C]; R]> for DataTable {
    fn from(rows: [[&str; C]; R]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        )
    }
}

/// How a value cell is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// true/false, yes/no, enabled/disabled
    Flag,
    Int,
    Text,
    /// Every row appends one value
    Repeated,
    /// Every row adds one `name -> value` entry
    Nested,
}

impl OptionKind {
    fn describe(&self) -> &'static str {
        match self {
            OptionKind::Flag => "a boolean",
            OptionKind::Int => "an integer",
            OptionKind::Text => "text",
            OptionKind::Repeated => "a list entry",
            OptionKind::Nested => "a name/value pair",
        }
    }
}

/// One recognised table key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionField {
    pub key: &'static str,
    pub kind: OptionKind,
}

impl OptionField {
    pub const fn flag(key: &'static str) -> Self {
        Self { key, kind: OptionKind::Flag }
    }

    pub const fn int(key: &'static str) -> Self {
        Self { key, kind: OptionKind::Int }
    }

    pub const fn text(key: &'static str) -> Self {
        Self { key, kind: OptionKind::Text }
    }

    pub const fn repeated(key: &'static str) -> Self {
        Self { key, kind: OptionKind::Repeated }
    }

    pub const fn nested(key: &'static str) -> Self {
        Self { key, kind: OptionKind::Nested }
    }
}

/// Errors from decoding a table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapperError {
    #[error("unknown table key '{key}' (expected one of: {expected})")]
    UnknownKey { key: String, expected: String },

    #[error("table key '{key}': cannot read '{value}' as {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("table key '{key}' given more than once")]
    Duplicate { key: String },

    #[error("table row {row} has {cells} cells, expected `key | value`")]
    Malformed { row: usize, cells: usize },

    #[error("table does not fit the option struct: {0}")]
    Decode(String),
}

/// Option struct decoded from a `key | value` table
pub trait TableOptions: DeserializeOwned + Default + Send + 'static {
    const FIELDS: &'static [OptionField];

    fn from_table(table: &DataTable) -> Result<Self, MapperError> {
        decode(table, Self::FIELDS)
    }
}

/// Decode `table` against `fields` into `T`
pub fn decode<T: DeserializeOwned>(table: &DataTable, fields: &[OptionField]) -> Result<T, MapperError> {
    let mut object = Map::new();

    for (index, row) in table.rows().iter().enumerate() {
        let key = row.first().map(|k| k.trim()).unwrap_or_default();
        let field = fields
            .iter()
            .find(|f| f.key == key)
            .ok_or_else(|| MapperError::UnknownKey {
                key: key.to_string(),
                expected: fields.iter().map(|f| f.key).collect::<Vec<_>>().join(", "),
            })?;

        let cells: Vec<&str> = row.iter().skip(1).map(|c| c.trim()).collect();
        let malformed = || MapperError::Malformed {
            row: index + 1,
            cells: row.len(),
        };

        match field.kind {
            OptionKind::Nested => {
                let (name, value) = match cells.as_slice() {
                    [name, value] => (name.to_string(), value.to_string()),
                    [pair] => {
                        let (name, value) = pair.split_once('=').ok_or_else(|| MapperError::InvalidValue {
                            key: key.to_string(),
                            value: pair.to_string(),
                            expected: field.kind.describe(),
                        })?;
                        (name.trim().to_string(), value.trim().to_string())
                    }
                    _ => return Err(malformed()),
                };
                let entry = object
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(map) = entry {
                    map.insert(name, Value::String(value));
                }
            }
            OptionKind::Repeated => {
                let [value] = cells.as_slice() else {
                    return Err(malformed());
                };
                let entry = object
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(values) = entry {
                    values.push(Value::String(value.to_string()));
                }
            }
            kind => {
                let [value] = cells.as_slice() else {
                    return Err(malformed());
                };
                if object.contains_key(key) {
                    return Err(MapperError::Duplicate { key: key.to_string() });
                }
                let parsed = parse_scalar(kind, value).ok_or_else(|| MapperError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    expected: kind.describe(),
                })?;
                object.insert(key.to_string(), parsed);
            }
        }
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| MapperError::Decode(e.to_string()))
}

fn parse_scalar(kind: OptionKind, value: &str) -> Option<Value> {
    match kind {
        OptionKind::Flag => parse_flag(value).map(Value::Bool),
        OptionKind::Int => value.parse::<i64>().ok().map(Value::from),
        _ => Some(Value::String(value.to_string())),
    }
}

/// Accepts true/false, yes/no and enabled/disabled in any case
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "enabled" => Some(true),
        "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(rename_all = "kebab-case", default)]
    struct Sample {
        profile: Vec<String>,
        native: bool,
        replicas: Option<i64>,
        image: Option<String>,
        env: BTreeMap<String, String>,
    }

    impl TableOptions for Sample {
        const FIELDS: &'static [OptionField] = &[
            OptionField::repeated("profile"),
            OptionField::flag("native"),
            OptionField::int("replicas"),
            OptionField::text("image"),
            OptionField::nested("env"),
        ];
    }

    #[test]
    fn test_decodes_every_kind() {
        let table = DataTable::new(vec![
            vec!["profile".into(), "dmn".into()],
            vec!["profile".into(), "process".into()],
            vec!["native".into(), "enabled".into()],
            vec!["replicas".into(), "2".into()],
            vec!["image".into(), "quay.io/a/b:1".into()],
            vec!["env".into(), "JAVA_OPTS".into(), "-Xmx1g".into()],
            vec!["env".into(), "DEBUG=true".into()],
        ]);
        let sample = Sample::from_table(&table).unwrap();

        assert_eq!(sample.profile, vec!["dmn", "process"]);
        assert!(sample.native);
        assert_eq!(sample.replicas, Some(2));
        assert_eq!(sample.image.as_deref(), Some("quay.io/a/b:1"));
        assert_eq!(sample.env["JAVA_OPTS"], "-Xmx1g");
        assert_eq!(sample.env["DEBUG"], "true");
    }

    #[test]
    fn test_empty_table_is_default() {
        assert_eq!(Sample::from_table(&DataTable::default()).unwrap(), Sample::default());
    }

    #[test]
    fn test_unknown_key_is_named() {
        let table = DataTable::from([["profile", "dmn"], ["unknown", "x"]]);
        let err = Sample::from_table(&table).unwrap_err();
        assert!(matches!(&err, MapperError::UnknownKey { key, .. } if key == "unknown"));
        assert!(err.to_string().contains("'unknown'"));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let err = Sample::from_table(&DataTable::from([["native", "maybe"]])).unwrap_err();
        assert!(matches!(err, MapperError::InvalidValue { expected: "a boolean", .. }));

        let err = Sample::from_table(&DataTable::from([["replicas", "two"]])).unwrap_err();
        assert!(matches!(err, MapperError::InvalidValue { expected: "an integer", .. }));

        let err = Sample::from_table(&DataTable::from([["env", "NOEQUALS"]])).unwrap_err();
        assert!(matches!(err, MapperError::InvalidValue { .. }));
    }

    #[test]
    fn test_scalar_keys_may_not_repeat() {
        let err = Sample::from_table(&DataTable::from([["image", "a"], ["image", "b"]])).unwrap_err();
        assert_eq!(err, MapperError::Duplicate { key: "image".into() });
    }

    #[test]
    fn test_row_shape_is_checked() {
        let table = DataTable::new(vec![vec!["native".into()]]);
        assert!(matches!(
            Sample::from_table(&table).unwrap_err(),
            MapperError::Malformed { row: 1, cells: 1 }
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("Disabled"), Some(false));
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("1"), None);
    }
}
