//! Error types for the ETL pipeline
//!
//! Every fallible library operation returns `EtlError`. The binary wraps these in
//! `anyhow` with context before reporting them.

use thiserror::Error;

/// Result alias used throughout the library
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Debug, Error)]
pub enum EtlError {
    /// The warehouse could not be reached after all connection attempts
    #[error("could not connect to the warehouse after {attempts} attempts: {reason}")]
    Connection { attempts: u32, reason: String },

    /// A single HTTP call returned an unexpected status
    #[error("request to {endpoint} failed with status {status}")]
    Request { endpoint: String, status: u16 },

    /// A wire record lacked a field the flattener requires
    #[error("{entity} record is missing field '{field}'")]
    MissingField { entity: &'static str, field: String },

    /// A warehouse load job failed
    #[error("load into {table} failed: {reason}")]
    Load { table: String, reason: String },

    #[error("request to {endpoint} could not be sent: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response from {endpoint} could not be decoded: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to encode rows: {0}")]
    Encode(String),
}

impl EtlError {
    pub fn missing(entity: &'static str, field: impl Into<String>) -> Self {
        EtlError::MissingField {
            entity,
            field: field.into(),
        }
    }

    pub fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        EtlError::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Errors that must stop the whole run instead of degrading one stage
    pub fn is_fatal(&self) -> bool {
        matches!(self, EtlError::Connection { .. } | EtlError::Load { .. })
    }
}
