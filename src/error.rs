use std::path::PathBuf;

use crate::types::push::NotificationId;

/// Missing or unusable server key material. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write key file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("found {present} without {missing}; refusing to generate a new key pair")]
    Partial { present: PathBuf, missing: PathBuf },
    #[error("key file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("stored public key does not belong to the stored private key")]
    Mismatch,
    #[error("failed to encode key pair: {0}")]
    Encode(String),
}

/// Failure while encrypting or signing for a single delivery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("{field} is not valid base64url")]
    Base64 { field: &'static str },
    #[error("subscriber public key is not an uncompressed P-256 point")]
    PublicKey,
    #[error("auth secret must be 16 bytes, got {0}")]
    AuthSecretLength(usize),
    #[error("key derivation failed")]
    Derivation,
    #[error("content encryption failed")]
    Encryption,
    #[error("invalid push endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Anything that stops a single queue entry from being turned into a request.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create store directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to migrate database: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored row is invalid: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("scheduled time lies in the past")]
    ScheduledInPast,
    #[error("notification {0} not found")]
    NotFound(NotificationId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}
