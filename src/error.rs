use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Lower layers raise the most specific kind; the connection manager passes
/// these through unchanged and wraps anything foreign as [`Error::Database`].
/// Messages carry field *names* where relevant, never field values.
#[derive(Debug, Error)]
pub enum Error {
    /// Registry structure invalid, connection name missing/duplicate, or an
    /// unsupported store format version.
    #[error("configuration error: {0}")]
    Config(String),

    /// Key derivation, encryption or decryption failure. Tampered data and a
    /// mismatched key are deliberately indistinguishable.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A field failed a type or required-ness check for its backend.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unsupported backend type or a malformed connection-string template.
    #[error("driver error: {0}")]
    Driver(String),

    /// Engine construction or liveness-probe failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected a query or command.
    #[error("query error: {0}")]
    Query(String),

    /// Umbrella for failures the manager cannot attribute to a more specific
    /// kind.
    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    pub(crate) fn missing_fields(backend: &str, fields: &[&str]) -> Self {
        Error::Validation(format!(
            "backend {backend} requires the following fields: {}",
            fields.join(", ")
        ))
    }

    pub(crate) fn unknown_connection(name: &str) -> Self {
        Error::Config(format!("connection `{name}` does not exist"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
