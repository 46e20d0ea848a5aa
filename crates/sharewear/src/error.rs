//! Error types for the marshaling and dispatch layers.

use std::time::Duration;

/// Errors that can occur in the sharewear crate.
///
/// Data problems met while decoding (an unknown record type, a blob that
/// cannot be fetched) are not errors: they degrade to `None` at the call
/// site. Everything here is either a programming error or a failure of
/// the external transport.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    /// A record type is known but violates the factory contract.
    #[error("Bad record type {type_name}: {reason}")]
    BadRecord { type_name: String, reason: String },

    /// An operation was attempted before `init` supplied a transport.
    #[error("Must call init() before calling {0}()")]
    NotInitialized(&'static str),

    /// An addressable record reported an empty path.
    #[error("Addressable record path must not be empty")]
    EmptyPath,

    /// A locator string could not be parsed.
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// A stream-backed buffer held truncated or malformed data.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The external transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A blocking connect did not complete in time.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    pub(crate) fn bad_record(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadRecord {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a programming error rather than a runtime
    /// condition. Schema violations and usage errors are never retried.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::BadRecord { .. } | Self::NotInitialized(_) | Self::EmptyPath
        )
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
