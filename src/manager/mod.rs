//! Connection lifecycle and pooling façade.
//!
//! The manager owns the registry and a table of live adapters keyed by
//! connection name. Pooled adapters are re-validated with a liveness probe
//! before reuse and replaced, never repaired, when found dead. All pool-table
//! mutation happens under one lock; statement execution on an obtained
//! adapter is governed by the adapter's own engine pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::{self, BackendAdapter, PoolSettings};
use crate::error::{Error, Result};
use crate::model::{BackendKind, ConnectionDefinition, FieldValue, Params, Row};
use crate::registry::{ConnectionRegistry, RegistryInfo};

struct PoolEntry {
    adapter: Arc<dyn BackendAdapter>,
    #[allow(dead_code)]
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    is_active: bool,
}

impl PoolEntry {
    fn new(adapter: Arc<dyn BackendAdapter>) -> Self {
        let now = Instant::now();
        Self {
            adapter,
            created_at: now,
            last_used_at: now,
            use_count: 1,
            is_active: true,
        }
    }

    fn touch(&mut self) {
        self.use_count += 1;
        self.last_used_at = Instant::now();
    }
}

/// Non-sensitive view of a stored definition.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub database: Option<String>,
}

pub struct ConnectionManager {
    registry: Mutex<ConnectionRegistry>,
    pool: Mutex<HashMap<String, PoolEntry>>,
    settings: PoolSettings,
}

impl ConnectionManager {
    /// Opens the manager against the default platform configuration
    /// directory for `app_name`.
    pub fn new(app_name: &str) -> Result<Self> {
        Ok(Self::from_registry(ConnectionRegistry::open_default(app_name)?))
    }

    /// Opens the manager against an explicit directory. Used by tests and
    /// callers that own their configuration layout.
    pub fn with_root(dir: impl Into<std::path::PathBuf>, app_name: &str) -> Result<Self> {
        Ok(Self::from_registry(ConnectionRegistry::open(dir, app_name)?))
    }

    pub fn with_settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    fn from_registry(registry: ConnectionRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
            pool: Mutex::new(HashMap::new()),
            settings: PoolSettings::default(),
        }
    }

    /// Validates and persists a new connection definition.
    pub async fn add_connection(
        &self,
        name: &str,
        mut definition: ConnectionDefinition,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Config("connection name must not be empty".to_string()));
        }

        let registry = self.registry.lock().await;
        if registry.connection_exists(name) {
            return Err(Error::Config(format!("connection `{name}` already exists")));
        }

        Self::apply_defaults(&mut definition);
        adapter::validate(&definition)?;
        registry.add_connection(name, &definition)?;
        info!(connection = name, backend = definition.kind.as_str(), "connection added");
        Ok(())
    }

    // Backend quirks that get safe defaults before persistence.
    fn apply_defaults(definition: &mut ConnectionDefinition) {
        match definition.kind {
            BackendKind::Sqlite => {
                if !definition.contains("database") {
                    definition
                        .fields
                        .insert("database".to_string(), FieldValue::from(":memory:"));
                }
            }
            BackendKind::Oracle => {
                if !definition.contains("service_name") && !definition.contains("sid") {
                    if let Some(database) = definition.get_str("database") {
                        let database = database.to_string();
                        definition
                            .fields
                            .insert("service_name".to_string(), FieldValue::Str(database));
                    }
                }
            }
            _ => {}
        }
    }

    /// Returns a live adapter for `name`.
    ///
    /// A pooled entry is reused only when it passes the liveness probe and no
    /// overrides were supplied. Overridden adapters are built fresh and never
    /// cached. A freshly connected adapter replaces any previous entry; when
    /// two callers race, the second to finish wins the pool slot.
    pub async fn get_connection(
        &self,
        name: &str,
        overrides: Option<&IndexMap<String, FieldValue>>,
    ) -> Result<Arc<dyn BackendAdapter>> {
        let reusable = overrides.is_none();

        if reusable {
            let mut pool = self.pool.lock().await;
            if let Some(entry) = pool.get_mut(name) {
                if entry.is_active && entry.adapter.is_connected().await {
                    entry.touch();
                    debug!(connection = name, uses = entry.use_count, "reusing pooled connection");
                    return Ok(entry.adapter.clone());
                }
                // dead entry: evict now, reconnect below
                if let Some(dead) = pool.remove(name) {
                    dead.adapter.disconnect().await;
                    debug!(connection = name, "evicted dead pooled connection");
                }
            }
        }

        let definition = {
            let registry = self.registry.lock().await;
            registry.get_connection(name)?
        };
        let definition = match overrides {
            Some(overrides) => definition.merged(overrides),
            None => definition,
        };

        let adapter = adapter::build(name, &definition, &self.settings)?;
        adapter.connect().await?;
        info!(connection = name, backend = definition.kind.as_str(), "connection established");

        if reusable {
            let mut pool = self.pool.lock().await;
            if let Some(displaced) = pool.insert(name.to_string(), PoolEntry::new(adapter.clone()))
            {
                if !displaced.is_active {
                    displaced.adapter.disconnect().await;
                }
            }
        }

        Ok(adapter)
    }

    /// Probes the named connection; never raises.
    pub async fn test_connection(&self, name: &str) -> bool {
        match self.get_connection(name, None).await {
            Ok(adapter) => adapter.test_connection().await,
            Err(e) => {
                warn!(connection = name, "connection test failed: {e}");
                false
            }
        }
    }

    /// Runs a query against the named connection.
    pub async fn execute_query(&self, name: &str, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let adapter = self.get_connection(name, None).await?;
        adapter.execute_query(sql, params).await
    }

    /// Runs a command (INSERT/UPDATE/DELETE/DDL) against the named
    /// connection, returning the affected-row count.
    pub async fn execute_command(&self, name: &str, sql: &str, params: &Params) -> Result<u64> {
        let adapter = self.get_connection(name, None).await?;
        adapter.execute_command(sql, params).await
    }

    /// Deletes the persisted definition, disconnecting any pooled adapter
    /// first.
    pub async fn remove_connection(&self, name: &str) -> Result<()> {
        self.evict(name).await;
        let registry = self.registry.lock().await;
        registry.remove_connection(name)?;
        info!(connection = name, "connection removed");
        Ok(())
    }

    /// Replaces the persisted definition, disconnecting any pooled adapter
    /// first.
    pub async fn update_connection(
        &self,
        name: &str,
        mut definition: ConnectionDefinition,
    ) -> Result<()> {
        self.evict(name).await;

        let registry = self.registry.lock().await;
        if !registry.connection_exists(name) {
            return Err(Error::unknown_connection(name));
        }
        Self::apply_defaults(&mut definition);
        adapter::validate(&definition)?;
        registry.update_connection(name, &definition)?;
        info!(connection = name, "connection updated");
        Ok(())
    }

    /// Non-sensitive subset of the stored definition.
    pub async fn connection_info(&self, name: &str) -> Result<ConnectionInfo> {
        let definition = {
            let registry = self.registry.lock().await;
            registry.get_connection(name)?
        };
        Ok(ConnectionInfo {
            name: name.to_string(),
            kind: definition.kind,
            host: definition.get_str("host").map(str::to_string),
            port: definition.get_int("port").or_else(|| {
                definition
                    .kind
                    .default_port()
                    .map(i64::from)
            }),
            database: definition.get_str("database").map(str::to_string),
        })
    }

    /// All persisted connection names in insertion order.
    pub async fn list_connections(&self) -> Result<Vec<String>> {
        let registry = self.registry.lock().await;
        registry.list_connections()
    }

    /// Summary of the underlying registry store.
    pub async fn registry_info(&self) -> Result<RegistryInfo> {
        let registry = self.registry.lock().await;
        registry.registry_info()
    }

    /// Disconnects and drops the pooled adapter for `name`. Idempotent.
    pub async fn close_connection(&self, name: &str) {
        self.evict(name).await;
    }

    /// Disconnects every pooled adapter. Call during orderly shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<PoolEntry> = {
            let mut pool = self.pool.lock().await;
            pool.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            entry.adapter.disconnect().await;
        }
        if count > 0 {
            info!(count, "closed all pooled connections");
        }
    }

    /// Evicts every pooled adapter idle for at least `max_idle`, returning
    /// the number evicted.
    pub async fn cleanup_idle_connections(&self, max_idle: Duration) -> usize {
        let expired: Vec<PoolEntry> = {
            let mut pool = self.pool.lock().await;
            let names: Vec<String> = pool
                .iter()
                .filter(|(_, entry)| entry.last_used_at.elapsed() >= max_idle)
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| pool.remove(&name))
                .collect()
        };
        let evicted = expired.len();
        for entry in expired {
            entry.adapter.disconnect().await;
        }
        if evicted > 0 {
            info!(evicted, "evicted idle pooled connections");
        }
        evicted
    }

    async fn evict(&self, name: &str) {
        let entry = {
            let mut pool = self.pool.lock().await;
            pool.remove(name)
        };
        if let Some(entry) = entry {
            entry.adapter.disconnect().await;
            debug!(connection = name, "pooled connection evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SqlValue;
    use tempfile::TempDir;

    fn memory_definition() -> ConnectionDefinition {
        ConnectionDefinition::new(BackendKind::Sqlite).with_field("database", ":memory:")
    }

    fn manager(dir: &TempDir) -> ConnectionManager {
        ConnectionManager::with_root(dir.path(), "test_app").unwrap()
    }

    #[tokio::test]
    async fn sqlite_end_to_end_scenario() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.add_connection("t1", memory_definition()).await.unwrap();
        assert!(manager.list_connections().await.unwrap().contains(&"t1".to_string()));
        assert!(manager.test_connection("t1").await);

        let created = manager
            .execute_command("t1", "CREATE TABLE x(id INT)", &Params::new())
            .await
            .unwrap();
        assert_eq!(created, 0);

        let rows = manager
            .execute_query("t1", "SELECT 1 AS n", &Params::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], SqlValue::Int(1));

        manager.close_all().await;
    }

    #[tokio::test]
    async fn missing_connection_is_a_config_error_naming_it() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let err = manager.get_connection("missing", None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();
        let err = manager
            .add_connection("x", memory_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(manager.list_connections().await.unwrap(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn add_validates_required_fields() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let definition = ConnectionDefinition::new(BackendKind::MySql).with_field("host", "h");
        let err = manager.add_connection("m", definition).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("username"));
        assert!(msg.contains("password"));
        assert!(msg.contains("database"));
    }

    #[tokio::test]
    async fn sqlite_database_defaults_to_memory() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .add_connection("bare", ConnectionDefinition::new(BackendKind::Sqlite))
            .await
            .unwrap();
        let info = manager.connection_info("bare").await.unwrap();
        assert_eq!(info.database.as_deref(), Some(":memory:"));
    }

    #[tokio::test]
    async fn pooled_adapter_is_reused() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();

        let first = manager.get_connection("x", None).await.unwrap();
        let second = manager.get_connection("x", None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        manager.close_all().await;
    }

    #[tokio::test]
    async fn overrides_bypass_the_pool() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();

        let pooled = manager.get_connection("x", None).await.unwrap();

        let mut overrides = IndexMap::new();
        overrides.insert("timeout".to_string(), FieldValue::Int(5));
        let ad_hoc = manager.get_connection("x", Some(&overrides)).await.unwrap();
        assert!(!Arc::ptr_eq(&pooled, &ad_hoc));

        // the pooled entry is untouched by the override
        let again = manager.get_connection("x", None).await.unwrap();
        assert!(Arc::ptr_eq(&pooled, &again));
        manager.close_all().await;
    }

    #[tokio::test]
    async fn cleanup_idle_evicts_everything_at_zero() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("a", memory_definition()).await.unwrap();
        manager.add_connection("b", memory_definition()).await.unwrap();
        manager.get_connection("a", None).await.unwrap();
        manager.get_connection("b", None).await.unwrap();

        let evicted = manager.cleanup_idle_connections(Duration::ZERO).await;
        assert_eq!(evicted, 2);
        assert_eq!(manager.cleanup_idle_connections(Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn long_idle_threshold_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("a", memory_definition()).await.unwrap();
        manager.get_connection("a", None).await.unwrap();
        assert_eq!(
            manager.cleanup_idle_connections(Duration::from_secs(3600)).await,
            0
        );
        manager.close_all().await;
    }

    #[tokio::test]
    async fn remove_evicts_and_deletes() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();
        manager.get_connection("x", None).await.unwrap();

        manager.remove_connection("x").await.unwrap();
        assert!(manager.list_connections().await.unwrap().is_empty());
        assert!(manager.get_connection("x", None).await.is_err());
    }

    #[tokio::test]
    async fn update_replaces_definition_and_evicts() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();
        let before = manager.get_connection("x", None).await.unwrap();

        let file_path = dir.path().join("updated.db");
        let updated = ConnectionDefinition::new(BackendKind::Sqlite)
            .with_field("database", file_path.to_str().unwrap());
        manager.update_connection("x", updated).await.unwrap();

        let after = manager.get_connection("x", None).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            manager.connection_info("x").await.unwrap().database.as_deref(),
            file_path.to_str()
        );
        manager.close_all().await;
    }

    #[tokio::test]
    async fn update_of_missing_connection_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let err = manager
            .update_connection("ghost", memory_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn close_connection_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.add_connection("x", memory_definition()).await.unwrap();
        manager.get_connection("x", None).await.unwrap();

        manager.close_connection("x").await;
        manager.close_connection("x").await;
        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_connection_returns_false_for_missing() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(!manager.test_connection("nope").await);
    }

    #[tokio::test]
    async fn connection_info_excludes_credentials() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let definition = ConnectionDefinition::new(BackendKind::MySql)
            .with_field("host", "dbhost")
            .with_field("username", "root")
            .with_field("password", "top_secret")
            .with_field("database", "shop");
        manager.add_connection("m", definition).await.unwrap();

        let info = manager.connection_info("m").await.unwrap();
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("top_secret"));
        assert!(!json.contains("root"));
        assert!(json.contains("dbhost"));
        assert_eq!(info.port, Some(3306));
    }

    #[tokio::test]
    async fn oracle_service_name_defaults_to_database() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let definition = ConnectionDefinition::new(BackendKind::Oracle)
            .with_field("host", "orahost")
            .with_field("username", "system")
            .with_field("password", "oracle")
            .with_field("database", "XEPDB1");
        manager.add_connection("ora", definition).await.unwrap();

        let registry = manager.registry.lock().await;
        let stored = registry.get_connection("ora").unwrap();
        assert_eq!(stored.get_str("service_name"), Some("XEPDB1"));
    }
}
