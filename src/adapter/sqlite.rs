//! SQLite adapter backed by rusqlite.
//!
//! rusqlite is synchronous, so the live connection sits behind a
//! `tokio::sync::Mutex`; statement execution is serialized per adapter.
//! A missing `database` field means an in-memory database.

use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection as SqliteConnection, OpenFlags, TransactionBehavior};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::params::{self, PlaceholderStyle};
use super::{ensure_not_blank, optional_bool, optional_str, warn_unsupported};
use crate::error::{Error, Result};
use crate::model::{BackendKind, ConnectionDefinition, FieldValue, Params, Row, SqlValue};

const SUPPORTED: &[&str] = &["timeout", "isolation_level", "check_same_thread"];
const VALID_ISOLATION: &[&str] = &["DEFERRED", "IMMEDIATE", "EXCLUSIVE"];

pub(super) fn validate(definition: &ConnectionDefinition) -> Result<()> {
    if let Some(value) = definition.get("database") {
        if value.as_str().is_none() {
            return Err(Error::Validation(format!(
                "field `database` must be a string, got {}",
                value.type_name()
            )));
        }
    }

    if let Some(value) = definition.get("timeout") {
        if value.as_float().is_none() {
            return Err(Error::Validation(format!(
                "field `timeout` must be a number, got {}",
                value.type_name()
            )));
        }
    }

    if let Some(level) = optional_str(definition, "isolation_level")? {
        if !VALID_ISOLATION.contains(&level) {
            return Err(Error::Validation(format!(
                "unsupported isolation level: {level}"
            )));
        }
    }

    if optional_bool(definition, "check_same_thread")?.is_some() {
        // thread affinity is owned by the adapter's lock
        warn!("parameter `check_same_thread` is ignored");
    }

    warn_unsupported(definition, SUPPORTED);
    Ok(())
}

pub(super) struct SqliteAdapter {
    name: String,
    database: String,
    busy_timeout: Option<Duration>,
    behavior: TransactionBehavior,
    conn: Mutex<Option<SqliteConnection>>,
}

impl SqliteAdapter {
    pub(super) fn new(name: &str, definition: &ConnectionDefinition) -> Result<Self> {
        let database = definition
            .get_str("database")
            .unwrap_or(":memory:")
            .to_string();

        let busy_timeout = definition
            .get("timeout")
            .and_then(FieldValue::as_float)
            .map(Duration::from_secs_f64);

        let behavior = match definition.get_str("isolation_level") {
            Some("IMMEDIATE") => TransactionBehavior::Immediate,
            Some("EXCLUSIVE") => TransactionBehavior::Exclusive,
            _ => TransactionBehavior::Deferred,
        };

        Ok(Self {
            name: name.to_string(),
            database,
            busy_timeout,
            behavior,
            conn: Mutex::new(None),
        })
    }

    fn open(&self) -> Result<SqliteConnection> {
        let conn = if self.database == ":memory:" {
            SqliteConnection::open_in_memory()
        } else {
            SqliteConnection::open_with_flags(
                &self.database,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        }
        .map_err(|e| Error::Connection(format!("unable to open SQLite database: {e}")))?;

        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| Error::Connection(format!("unable to set busy timeout: {e}")))?;
        }
        Ok(conn)
    }

    fn probe(conn: &SqliteConnection) -> Result<()> {
        conn.query_row(BackendKind::Sqlite.probe_sql(), [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| Error::Connection(format!("liveness probe failed: {e}")))?;
        Ok(())
    }

    fn not_connected(&self) -> Error {
        Error::Connection(format!("connection `{}` is not connected", self.name))
    }
}

#[async_trait::async_trait]
impl super::BackendAdapter for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connection_string(&self) -> String {
        format!("sqlite:///{}", self.database)
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let conn = self.open()?;
        Self::probe(&conn)?;
        *guard = Some(conn);
        debug!(connection = self.name.as_str(), "SQLite connection established");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(connection = self.name.as_str(), "SQLite connection closed");
        }
    }

    async fn is_connected(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match guard.as_ref() {
            None => false,
            Some(conn) => {
                if Self::probe(conn).is_ok() {
                    true
                } else {
                    guard.take();
                    false
                }
            }
        }
    }

    async fn execute_query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        ensure_not_blank(sql)?;
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(|| self.not_connected())?;

        let bound = params::bind(sql, PlaceholderStyle::Named);
        let values = params::ordered_values(&bound.names, params)?;
        let keyed: Vec<(String, SqlValue)> = bound
            .names
            .iter()
            .zip(values)
            .map(|(name, value)| (format!(":{name}"), value))
            .collect();
        let args: Vec<(&str, &dyn rusqlite::ToSql)> = keyed
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Query(format!("SQLite rejected the statement: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(&args[..])
            .map_err(|e| Error::Query(format!("SQLite rejected the query: {e}")))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Query(format!("row fetch failed: {e}")))?
        {
            let mut mapped = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                mapped.insert(column.clone(), cell_value(row, idx));
            }
            out.push(mapped);
        }
        Ok(out)
    }

    async fn execute_command(&self, sql: &str, params: &Params) -> Result<u64> {
        ensure_not_blank(sql)?;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.not_connected())?;

        let bound = params::bind(sql, PlaceholderStyle::Named);
        let values = params::ordered_values(&bound.names, params)?;
        let keyed: Vec<(String, SqlValue)> = bound
            .names
            .iter()
            .zip(values)
            .map(|(name, value)| (format!(":{name}"), value))
            .collect();

        let tx = conn
            .transaction_with_behavior(self.behavior)
            .map_err(|e| Error::Query(format!("unable to begin transaction: {e}")))?;
        let affected = {
            let args: Vec<(&str, &dyn rusqlite::ToSql)> = keyed
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                .collect();
            let mut stmt = tx
                .prepare(sql)
                .map_err(|e| Error::Query(format!("SQLite rejected the statement: {e}")))?;
            stmt.execute(&args[..])
                .map_err(|e| Error::Query(format!("SQLite rejected the command: {e}")))?
        };
        tx.commit()
            .map_err(|e| Error::Query(format!("commit failed: {e}")))?;
        Ok(affected as u64)
    }
}

fn cell_value(row: &rusqlite::Row<'_>, idx: usize) -> SqlValue {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => SqlValue::Null,
        Ok(ValueRef::Integer(i)) => SqlValue::Int(i),
        Ok(ValueRef::Real(f)) => SqlValue::Float(f),
        Ok(ValueRef::Text(t)) => SqlValue::Str(String::from_utf8_lossy(t).into_owned()),
        Ok(ValueRef::Blob(b)) => SqlValue::Bytes(b.to_vec()),
        Err(_) => SqlValue::Null,
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Str(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::BackendAdapter;
    use super::*;

    fn memory_adapter() -> SqliteAdapter {
        let definition = ConnectionDefinition::new(BackendKind::Sqlite);
        SqliteAdapter::new("t1", &definition).unwrap()
    }

    #[test]
    fn missing_database_defaults_to_memory() {
        let adapter = memory_adapter();
        assert_eq!(adapter.connection_string(), "sqlite:///:memory:");
    }

    #[test]
    fn validate_rejects_bad_isolation_level() {
        let definition = ConnectionDefinition::new(BackendKind::Sqlite)
            .with_field("isolation_level", "SERIALIZABLE");
        assert!(matches!(validate(&definition), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_rejects_non_numeric_timeout() {
        let definition =
            ConnectionDefinition::new(BackendKind::Sqlite).with_field("timeout", "thirty");
        assert!(validate(&definition).is_err());
        let definition = ConnectionDefinition::new(BackendKind::Sqlite).with_field("timeout", 30_i64);
        assert!(validate(&definition).is_ok());
    }

    #[tokio::test]
    async fn connect_probe_and_test() {
        let adapter = memory_adapter();
        assert!(!adapter.is_connected().await);
        adapter.connect().await.unwrap();
        assert!(adapter.is_connected().await);
        assert!(adapter.test_connection().await);

        // connect is a no-op when already connected
        adapter.connect().await.unwrap();

        adapter.disconnect().await;
        assert!(!adapter.is_connected().await);
        // disconnect is idempotent
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn create_insert_and_query_with_named_params() {
        let adapter = memory_adapter();
        adapter.connect().await.unwrap();

        let created = adapter
            .execute_command("CREATE TABLE users (id INT, name TEXT, score REAL)", &Params::new())
            .await
            .unwrap();
        assert_eq!(created, 0);

        let params: Params = [
            ("id".to_string(), SqlValue::Int(1)),
            ("name".to_string(), SqlValue::Str("ada".to_string())),
            ("score".to_string(), SqlValue::Float(9.5)),
        ]
        .into_iter()
        .collect();
        let inserted = adapter
            .execute_command(
                "INSERT INTO users (id, name, score) VALUES (:id, :name, :score)",
                &params,
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let filter: Params = [("id".to_string(), SqlValue::Int(1))].into_iter().collect();
        let rows = adapter
            .execute_query("SELECT id, name, score FROM users WHERE id = :id", &filter)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], SqlValue::Int(1));
        assert_eq!(rows[0]["name"], SqlValue::Str("ada".to_string()));
        assert_eq!(rows[0]["score"], SqlValue::Float(9.5));
    }

    #[tokio::test]
    async fn select_one_returns_aliased_column() {
        let adapter = memory_adapter();
        adapter.connect().await.unwrap();
        let rows = adapter
            .execute_query("SELECT 1 AS n", &Params::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], SqlValue::Int(1));
    }

    #[tokio::test]
    async fn failed_command_rolls_back() {
        let adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .execute_command("CREATE TABLE t (id INT PRIMARY KEY)", &Params::new())
            .await
            .unwrap();
        adapter
            .execute_command("INSERT INTO t (id) VALUES (1)", &Params::new())
            .await
            .unwrap();

        // duplicate primary key fails and must not leave partial state
        let err = adapter
            .execute_command("INSERT INTO t (id) VALUES (1)", &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));

        let rows = adapter
            .execute_query("SELECT COUNT(*) AS n FROM t", &Params::new())
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], SqlValue::Int(1));
    }

    #[tokio::test]
    async fn blank_sql_is_a_query_error() {
        let adapter = memory_adapter();
        adapter.connect().await.unwrap();
        assert!(matches!(
            adapter.execute_query("   ", &Params::new()).await,
            Err(Error::Query(_))
        ));
        assert!(matches!(
            adapter.execute_command("", &Params::new()).await,
            Err(Error::Query(_))
        ));
    }

    #[tokio::test]
    async fn unconnected_execution_is_a_connection_error() {
        let adapter = memory_adapter();
        assert!(matches!(
            adapter.execute_query("SELECT 1", &Params::new()).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn missing_named_parameter_is_rejected() {
        let adapter = memory_adapter();
        adapter.connect().await.unwrap();
        let err = adapter
            .execute_query("SELECT :x AS x", &Params::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`x`"));
    }

    #[tokio::test]
    async fn file_database_persists_across_reconnect() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let definition = ConnectionDefinition::new(BackendKind::Sqlite)
            .with_field("database", path.to_str().unwrap());
        let adapter = SqliteAdapter::new("file_db", &definition).unwrap();

        adapter.connect().await.unwrap();
        adapter
            .execute_command("CREATE TABLE kv (k TEXT, v TEXT)", &Params::new())
            .await
            .unwrap();
        let params: Params = [
            ("k".to_string(), SqlValue::Str("a".to_string())),
            ("v".to_string(), SqlValue::Str("1".to_string())),
        ]
        .into_iter()
        .collect();
        adapter
            .execute_command("INSERT INTO kv VALUES (:k, :v)", &params)
            .await
            .unwrap();
        adapter.disconnect().await;

        adapter.connect().await.unwrap();
        let rows = adapter
            .execute_query("SELECT v FROM kv WHERE k = 'a'", &Params::new())
            .await
            .unwrap();
        assert_eq!(rows[0]["v"], SqlValue::Str("1".to_string()));
    }
}
