//! Per-backend database adapters.
//!
//! One [`BackendAdapter`] implementation exists per supported backend,
//! selected once at construction from the definition's type tag. Each adapter
//! validates its backend's parameter set, builds the connection string, owns
//! an engine-level pool and executes parameterized statements, returning rows
//! as uniform name-to-value mappings.

pub mod params;

mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{BackendKind, ConnectionDefinition, FieldValue, Params, Row};

/// Engine-level pool knobs, applied to every adapter that pools.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: u32,
    pub min_idle: u32,
    /// Validate a pooled connection before handing it out.
    pub pre_ping: bool,
    pub connect_timeout: Duration,
    /// Recycle connections older than this.
    pub recycle: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_idle: 1,
            pre_ping: true,
            connect_timeout: Duration::from_secs(30),
            recycle: Duration::from_secs(3600),
        }
    }
}

/// Uniform contract over the five backends.
///
/// Every instance moves between exactly two states: unconnected and
/// connected. [`connect`](Self::connect) only marks the adapter connected
/// after the liveness probe has passed; a failed probe disposes the partially
/// constructed engine.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Name of the connection profile this adapter was built for.
    fn name(&self) -> &str;

    /// The connection string this adapter connects with. Contains the
    /// percent-encoded password; never log it.
    fn connection_string(&self) -> String;

    /// Builds the engine/pool and runs the liveness probe. A no-op when
    /// already connected.
    async fn connect(&self) -> Result<()>;

    /// Disposes engine resources. Idempotent.
    async fn disconnect(&self);

    /// Actively re-probes the backend, downgrading the connected state if the
    /// probe fails.
    async fn is_connected(&self) -> bool;

    /// Connects if necessary and probes; returns `false` instead of raising.
    async fn test_connection(&self) -> bool {
        if self.connect().await.is_err() {
            return false;
        }
        self.is_connected().await
    }

    /// Runs a query with named `:param` placeholders, returning one
    /// name-to-value mapping per row.
    async fn execute_query(&self, sql: &str, params: &Params) -> Result<Vec<Row>>;

    /// Runs a statement inside an explicit transaction (commit on success,
    /// roll back on failure) and returns the affected-row count.
    async fn execute_command(&self, sql: &str, params: &Params) -> Result<u64>;
}

impl std::fmt::Debug for dyn BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

/// Validates `definition` and constructs the matching adapter, unconnected.
pub fn build(
    name: &str,
    definition: &ConnectionDefinition,
    settings: &PoolSettings,
) -> Result<Arc<dyn BackendAdapter>> {
    validate(definition)?;
    let adapter: Arc<dyn BackendAdapter> = match definition.kind {
        BackendKind::Oracle => Arc::new(oracle::OracleAdapter::new(name, definition)?),
        BackendKind::Postgres => {
            Arc::new(postgres::PostgresAdapter::new(name, definition, settings)?)
        }
        BackendKind::MySql => Arc::new(mysql::MySqlAdapter::new(name, definition, settings)?),
        BackendKind::MsSql => Arc::new(mssql::MsSqlAdapter::new(name, definition, settings)?),
        BackendKind::Sqlite => Arc::new(sqlite::SqliteAdapter::new(name, definition)?),
    };
    Ok(adapter)
}

/// Runs the backend-specific validation for `definition`.
pub fn validate(definition: &ConnectionDefinition) -> Result<()> {
    match definition.kind {
        BackendKind::Oracle => oracle::validate(definition),
        BackendKind::Postgres => postgres::validate(definition),
        BackendKind::MySql => mysql::validate(definition),
        BackendKind::MsSql => mssql::validate(definition),
        BackendKind::Sqlite => sqlite::validate(definition),
    }
}

/// Parameters every networked backend understands.
pub(crate) const BASE_PARAMS: &[&str] = &["host", "port", "username", "password", "database"];

pub(crate) fn require_fields(definition: &ConnectionDefinition, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !definition.contains(field))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::missing_fields(definition.kind.as_str(), &missing))
    }
}

pub(crate) fn require_str<'a>(
    definition: &'a ConnectionDefinition,
    field: &str,
) -> Result<&'a str> {
    match definition.get(field) {
        Some(FieldValue::Str(s)) => Ok(s),
        Some(other) => Err(Error::Validation(format!(
            "field `{field}` must be a string, got {}",
            other.type_name()
        ))),
        None => Err(Error::missing_fields(definition.kind.as_str(), &[field])),
    }
}

pub(crate) fn optional_str<'a>(
    definition: &'a ConnectionDefinition,
    field: &str,
) -> Result<Option<&'a str>> {
    match definition.get(field) {
        None => Ok(None),
        Some(FieldValue::Str(s)) => Ok(Some(s)),
        Some(other) => Err(Error::Validation(format!(
            "field `{field}` must be a string, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn optional_bool(definition: &ConnectionDefinition, field: &str) -> Result<Option<bool>> {
    match definition.get(field) {
        None => Ok(None),
        Some(FieldValue::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(Error::Validation(format!(
            "field `{field}` must be a boolean, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn optional_int(definition: &ConnectionDefinition, field: &str) -> Result<Option<i64>> {
    match definition.get(field) {
        None => Ok(None),
        Some(FieldValue::Int(i)) => Ok(Some(*i)),
        Some(other) => Err(Error::Validation(format!(
            "field `{field}` must be an integer, got {}",
            other.type_name()
        ))),
    }
}

/// The `port` field, checked for type and range.
pub(crate) fn port(definition: &ConnectionDefinition) -> Result<Option<u16>> {
    match optional_int(definition, "port")? {
        None => Ok(None),
        Some(p) if (1..=i64::from(u16::MAX)).contains(&p) => Ok(Some(p as u16)),
        Some(p) => Err(Error::Validation(format!("port {p} is out of range"))),
    }
}

pub(crate) fn port_or_default(definition: &ConnectionDefinition) -> Result<u16> {
    Ok(port(definition)?
        .or_else(|| definition.kind.default_port())
        .unwrap_or(0))
}

/// Unsupported extras are ignored with a warning, never a hard failure.
pub(crate) fn warn_unsupported(definition: &ConnectionDefinition, supported: &[&str]) {
    for field in definition.fields.keys() {
        if !BASE_PARAMS.contains(&field.as_str()) && !supported.contains(&field.as_str()) {
            warn!(
                backend = definition.kind.as_str(),
                field = field.as_str(),
                "parameter is not supported by this backend and will be ignored"
            );
        }
    }
}

pub(crate) fn ensure_not_blank(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        Err(Error::Query("SQL statement is empty".to_string()))
    } else {
        Ok(())
    }
}

// Everything outside RFC 3986 unreserved gets escaped in URL components.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_def() -> ConnectionDefinition {
        ConnectionDefinition::new(BackendKind::MySql)
            .with_field("host", "localhost")
            .with_field("username", "root")
            .with_field("password", "pw")
            .with_field("database", "db")
    }

    #[test]
    fn build_selects_adapter_by_kind() {
        let adapter = build("t", &mysql_def(), &PoolSettings::default()).unwrap();
        assert_eq!(adapter.kind(), BackendKind::MySql);
        assert_eq!(adapter.name(), "t");
    }

    #[test]
    fn build_rejects_invalid_definitions() {
        let definition = ConnectionDefinition::new(BackendKind::MySql).with_field("host", "h");
        let err = build("t", &definition, &PoolSettings::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("username"));
        assert!(msg.contains("password"));
        assert!(msg.contains("database"));
    }

    #[test]
    fn unsupported_extras_are_not_a_hard_failure() {
        let definition = mysql_def().with_field("bogus_param", "x");
        assert!(validate(&definition).is_ok());
    }

    #[test]
    fn port_must_be_an_integer() {
        let definition = mysql_def().with_field("port", "3306");
        assert!(matches!(port(&definition), Err(Error::Validation(_))));
    }

    #[test]
    fn port_must_be_in_range() {
        let definition = mysql_def().with_field("port", 99_999_i64);
        assert!(port(&definition).is_err());
        let definition = mysql_def().with_field("port", 3307_i64);
        assert_eq!(port(&definition).unwrap(), Some(3307));
    }

    #[test]
    fn default_ports_fill_in() {
        assert_eq!(port_or_default(&mysql_def()).unwrap(), 3306);
        let pg = ConnectionDefinition::new(BackendKind::Postgres);
        assert_eq!(port_or_default(&pg).unwrap(), 5432);
    }

    #[test]
    fn component_encoding_escapes_url_specials() {
        assert_eq!(encode_component("p@ss:word/1"), "p%40ss%3Aword%2F1");
        assert_eq!(encode_component("plain-user_1.x~y"), "plain-user_1.x~y");
    }

    #[test]
    fn blank_sql_is_rejected() {
        assert!(ensure_not_blank("  \n ").is_err());
        assert!(ensure_not_blank("SELECT 1").is_ok());
    }
}
