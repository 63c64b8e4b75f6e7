//! Shared data model: backend tags, typed connection fields and the uniform
//! tabular result values returned by every adapter.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "oracle")]
    Oracle,
    #[serde(rename = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mssql")]
    MsSql,
    #[serde(rename = "sqlite")]
    Sqlite,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Oracle,
        BackendKind::Postgres,
        BackendKind::MySql,
        BackendKind::MsSql,
        BackendKind::Sqlite,
    ];

    /// Canonical type tag as stored in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Oracle => "oracle",
            BackendKind::Postgres => "postgresql",
            BackendKind::MySql => "mysql",
            BackendKind::MsSql => "mssql",
            BackendKind::Sqlite => "sqlite",
        }
    }

    /// Display name for CLI output
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Oracle => "Oracle",
            BackendKind::Postgres => "PostgreSQL",
            BackendKind::MySql => "MySQL",
            BackendKind::MsSql => "Microsoft SQL Server",
            BackendKind::Sqlite => "SQLite",
        }
    }

    /// Default port for the backend. SQLite is file-based and has none.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            BackendKind::Oracle => Some(1521),
            BackendKind::Postgres => Some(5432),
            BackendKind::MySql => Some(3306),
            BackendKind::MsSql => Some(1433),
            BackendKind::Sqlite => None,
        }
    }

    /// Trivial statement used to confirm a connection is actually usable.
    pub fn probe_sql(&self) -> &'static str {
        match self {
            BackendKind::Oracle => "SELECT 1 FROM DUAL",
            _ => "SELECT 1",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oracle" => Ok(BackendKind::Oracle),
            "postgresql" | "postgres" => Ok(BackendKind::Postgres),
            "mysql" => Ok(BackendKind::MySql),
            "mssql" | "sqlserver" => Ok(BackendKind::MsSql),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(Error::Config(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed connection-definition field.
///
/// The tagged serde form (`{"kind": "int", "value": 5432}`) is what gets
/// encrypted, so values round-trip through the registry with their original
/// type intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "str",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// A named bag of typed connection parameters for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDefinition {
    pub kind: BackendKind,
    pub fields: IndexMap<String, FieldValue>,
}

impl ConnectionDefinition {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(FieldValue::as_int)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(FieldValue::as_bool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this definition with caller-supplied overrides applied on top.
    /// Used for ad hoc variants of a stored connection; never persisted.
    pub fn merged(&self, overrides: &IndexMap<String, FieldValue>) -> Self {
        let mut merged = self.clone();
        for (name, value) in overrides {
            merged.fields.insert(name.clone(), value.clone());
        }
        merged
    }
}

/// A single cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => SqlValue::Str(s),
            other => SqlValue::Str(other.to_string()),
        }
    }
}

/// One result row: column name to value, in select order.
pub type Row = IndexMap<String, SqlValue>;

/// Named bind parameters for a query or command.
pub type Params = IndexMap<String, SqlValue>;
