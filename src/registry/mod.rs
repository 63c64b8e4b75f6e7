//! Encrypted store of named connection definitions.
//!
//! The registry is a TOML document with four top-level sections: a format
//! version, the owning application name, the connection map and metadata
//! timestamps. Every field of every definition is serialized through the
//! type-tagged [`FieldValue`] envelope and encrypted independently, so one
//! corrupted field never takes the rest of the record with it. The key
//! material lives beside the document in `encryption.key`; losing that file
//! makes the store permanently unreadable.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::{CryptoEngine, KeyMaterial};
use crate::error::{Error, Result};
use crate::model::{BackendKind, ConnectionDefinition, FieldValue};
use crate::paths;

/// Version written into new registry documents.
pub const FORMAT_VERSION: &str = "1.0.0";

const SUPPORTED_VERSIONS: &[&str] = &["1.0.0", "1.1.0"];
const REGISTRY_FILE: &str = "connections.toml";
const KEY_FILE: &str = "encryption.key";

/// Field name the backend tag is stored under; reserved in every record.
const TYPE_FIELD: &str = "type";

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: String,
    app_name: String,
    // an empty connection map may serialize as no table at all
    #[serde(default)]
    connections: IndexMap<String, IndexMap<String, String>>,
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    created: String,
    last_modified: String,
}

/// Non-sensitive summary of the store itself.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryInfo {
    pub version: String,
    pub app_name: String,
    pub connection_count: usize,
    pub created: String,
    pub last_modified: String,
    pub path: PathBuf,
}

pub struct ConnectionRegistry {
    app_name: String,
    dir: PathBuf,
    path: PathBuf,
    crypto: CryptoEngine,
}

impl ConnectionRegistry {
    /// Opens (or initializes) the registry rooted at `dir`.
    ///
    /// Creates the directory, an empty document and fresh key material on
    /// first use; loads the existing key material otherwise.
    pub fn open(dir: impl Into<PathBuf>, app_name: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Config(format!(
                "unable to create registry directory {}: {e}",
                dir.display()
            ))
        })?;

        let path = dir.join(REGISTRY_FILE);
        let crypto = Self::load_or_create_key(&dir)?;
        let registry = Self {
            app_name: app_name.to_string(),
            dir,
            path,
            crypto,
        };

        if !registry.path.exists() {
            let now = Utc::now().to_rfc3339();
            let mut document = RegistryDocument {
                version: FORMAT_VERSION.to_string(),
                app_name: registry.app_name.clone(),
                connections: IndexMap::new(),
                metadata: Metadata {
                    created: now.clone(),
                    last_modified: now,
                },
            };
            registry.save_document(&mut document)?;
            info!(path = %registry.path.display(), "created empty connection registry");
        }

        Ok(registry)
    }

    /// Opens the registry in the per-platform configuration directory.
    pub fn open_default(app_name: &str) -> Result<Self> {
        let dir = paths::ensure_config_dir(app_name)?;
        Self::open(dir, app_name)
    }

    fn load_or_create_key(dir: &Path) -> Result<CryptoEngine> {
        let key_path = dir.join(KEY_FILE);
        if key_path.exists() {
            let raw = fs::read_to_string(&key_path)
                .map_err(|e| Error::Config(format!("unable to read key material: {e}")))?;
            let material: KeyMaterial = toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid key material file: {e}")))?;
            let engine = CryptoEngine::from_material(&material)?;
            debug!("loaded existing encryption key material");
            Ok(engine)
        } else {
            let engine = CryptoEngine::new();
            let material = engine.key_material();
            let raw = toml::to_string(&material)
                .map_err(|e| Error::Config(format!("unable to serialize key material: {e}")))?;
            fs::write(&key_path, raw)
                .map_err(|e| Error::Config(format!("unable to write key material: {e}")))?;
            info!(path = %key_path.display(), "created new encryption key material");
            Ok(engine)
        }
    }

    fn load_document(&self) -> Result<RegistryDocument> {
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!(
                "unable to read registry {}: {e}",
                self.path.display()
            ))
        })?;
        let document: RegistryDocument = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("registry document is invalid: {e}")))?;
        Self::validate_document(&document)?;
        Ok(document)
    }

    fn save_document(&self, document: &mut RegistryDocument) -> Result<()> {
        document.metadata.last_modified = Utc::now().to_rfc3339();
        Self::validate_document(document)?;
        let raw = toml::to_string_pretty(document)
            .map_err(|e| Error::Config(format!("unable to serialize registry: {e}")))?;
        fs::write(&self.path, raw).map_err(|e| {
            Error::Config(format!(
                "unable to write registry {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    fn validate_document(document: &RegistryDocument) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&document.version.as_str()) {
            return Err(Error::Config(format!(
                "unsupported registry format version: {}",
                document.version
            )));
        }
        Ok(())
    }

    /// Adds a definition under `name`, encrypting every field.
    pub fn add_connection(&self, name: &str, definition: &ConnectionDefinition) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Config("connection name must not be empty".to_string()));
        }
        if definition.is_empty() {
            return Err(Error::Config(format!(
                "connection `{name}` has no fields"
            )));
        }
        if definition.contains(TYPE_FIELD) {
            return Err(Error::Config(format!(
                "field name `{TYPE_FIELD}` is reserved"
            )));
        }

        let mut document = self.load_document()?;
        if document.connections.contains_key(name) {
            return Err(Error::Config(format!("connection `{name}` already exists")));
        }

        let mut record = IndexMap::with_capacity(definition.fields.len() + 1);
        record.insert(
            TYPE_FIELD.to_string(),
            self.encrypt_field(&FieldValue::Str(definition.kind.as_str().to_string()))?,
        );
        for (field, value) in &definition.fields {
            record.insert(field.clone(), self.encrypt_field(value)?);
        }

        document.connections.insert(name.to_string(), record);
        self.save_document(&mut document)?;
        info!(connection = name, "added connection definition");
        Ok(())
    }

    /// Retrieves and decrypts the definition stored under `name`.
    pub fn get_connection(&self, name: &str) -> Result<ConnectionDefinition> {
        let document = self.load_document()?;
        let record = document
            .connections
            .get(name)
            .ok_or_else(|| Error::unknown_connection(name))?;

        let kind_token = record
            .get(TYPE_FIELD)
            .ok_or_else(|| Error::Config(format!("connection `{name}` has no type tag")))?;
        let kind = match self.decrypt_field(name, TYPE_FIELD, kind_token)? {
            FieldValue::Str(tag) => BackendKind::from_str(&tag)?,
            other => {
                return Err(Error::Config(format!(
                    "connection `{name}` has a non-string type tag ({})",
                    other.type_name()
                )));
            }
        };

        let mut definition = ConnectionDefinition::new(kind);
        for (field, token) in record {
            if field == TYPE_FIELD {
                continue;
            }
            definition
                .fields
                .insert(field.clone(), self.decrypt_field(name, field, token)?);
        }
        debug!(connection = name, "retrieved connection definition");
        Ok(definition)
    }

    fn encrypt_field(&self, value: &FieldValue) -> Result<String> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| Error::Config(format!("unable to serialize field value: {e}")))?;
        self.crypto.encrypt(&serialized)
    }

    fn decrypt_field(&self, name: &str, field: &str, token: &str) -> Result<FieldValue> {
        let serialized = self.crypto.decrypt(token)?;
        match serde_json::from_str(&serialized) {
            Ok(value) => Ok(value),
            Err(e) => {
                // Conversion failures are non-fatal; fall back to the raw string.
                warn!(
                    connection = name,
                    field, "field envelope could not be decoded, keeping raw value: {e}"
                );
                Ok(FieldValue::Str(serialized))
            }
        }
    }

    /// Removes the definition stored under `name`.
    pub fn remove_connection(&self, name: &str) -> Result<()> {
        let mut document = self.load_document()?;
        if document.connections.shift_remove(name).is_none() {
            return Err(Error::unknown_connection(name));
        }
        self.save_document(&mut document)?;
        info!(connection = name, "removed connection definition");
        Ok(())
    }

    /// Replaces the definition stored under `name`.
    ///
    /// Implemented as remove followed by add; a crash between the two steps
    /// loses the definition. This gap is deliberate and documented.
    pub fn update_connection(&self, name: &str, definition: &ConnectionDefinition) -> Result<()> {
        self.remove_connection(name)?;
        self.add_connection(name, definition)?;
        info!(connection = name, "updated connection definition");
        Ok(())
    }

    /// All connection names in insertion order.
    pub fn list_connections(&self) -> Result<Vec<String>> {
        let document = self.load_document()?;
        Ok(document.connections.keys().cloned().collect())
    }

    pub fn connection_exists(&self, name: &str) -> bool {
        self.load_document()
            .map(|document| document.connections.contains_key(name))
            .unwrap_or(false)
    }

    /// Summary of the store without any decrypted content.
    pub fn registry_info(&self) -> Result<RegistryInfo> {
        let document = self.load_document()?;
        Ok(RegistryInfo {
            version: document.version,
            app_name: document.app_name,
            connection_count: document.connections.len(),
            created: document.metadata.created,
            last_modified: document.metadata.last_modified,
            path: self.path.clone(),
        })
    }

    /// Copies the registry document to `to`, or to a timestamped sibling when
    /// `to` is `None`. Key material is not backed up.
    pub fn backup(&self, to: Option<PathBuf>) -> Result<PathBuf> {
        let target = to.unwrap_or_else(|| {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            self.dir.join(format!("{REGISTRY_FILE}.backup.{stamp}"))
        });
        fs::copy(&self.path, &target)
            .map_err(|e| Error::Config(format!("registry backup failed: {e}")))?;
        info!(path = %target.display(), "backed up registry document");
        Ok(target)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
