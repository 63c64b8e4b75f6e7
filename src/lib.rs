//! # Hydra DB
//!
//! Hydra DB is a Rust-based command-line tool for managing named database
//! connection profiles across Oracle, PostgreSQL, MySQL, SQL Server and
//! SQLite, and for running queries against them through one uniform API.
//!
//! ## Features
//!
//! - **Encrypted Connection Registry**: connection definitions are stored in
//!   a TOML document under the user's configuration directory with every
//!   field individually encrypted (AES-256-GCM, PBKDF2-derived key)
//! - **Five Backends, One Contract**: per-backend adapters validate their
//!   parameter sets, build connection strings with sane default ports, and
//!   execute parameterized queries and commands through a shared trait
//! - **Connection Pooling**: live adapters are cached by connection name,
//!   probed for liveness before reuse, and evicted when dead or idle
//! - **Typed Round-Trips**: integer, float and boolean fields survive the
//!   encrypt/decrypt cycle with their original types intact
//!
//! ## Usage
//!
//! This library backs the `hydra-db` binary in `src/main.rs`; the
//! [`ConnectionManager`] is the entry point for embedding it elsewhere.
//!
//! ## Modules
//!
//! - `crypto`: key derivation and field encryption
//! - `registry`: the persisted, encrypted connection store
//! - `adapter`: per-backend drivers behind the `BackendAdapter` trait
//! - `manager`: pooling/lifecycle façade over registry and adapters

pub mod adapter;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod model;
pub mod paths;
pub mod registry;

pub use adapter::{BackendAdapter, PoolSettings};
pub use crypto::CryptoEngine;
pub use error::{Error, Result};
pub use manager::ConnectionManager;
pub use model::{BackendKind, ConnectionDefinition, FieldValue, Params, Row, SqlValue};
pub use registry::ConnectionRegistry;
