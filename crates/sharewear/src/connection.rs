//! Connection lifecycle model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the dispatcher's connection to the transport.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Suspended -> Connecting
///                      |             |            |
///                      +-------------+------------+--> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection dropped by the transport; a reconnect may follow.
    Suspended,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is an expected transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Suspended)
                | (Connected, Disconnected)
                | (Suspended, Connecting)
                | (Suspended, Connected)
                | (Suspended, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Why an established connection was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendCause {
    ServiceDisconnected,
    NetworkLost,
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    ServiceMissing,
    ServiceUpdating,
    ServiceVersionUpdateRequired,
    ServiceDisabled,
    ApiUnavailable,
    NetworkError,
    Timeout,
    Internal,
}

/// A failed connection attempt as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFailure {
    pub code: FailureCode,
    /// The platform can offer the user a way to fix this (install, update,
    /// enable the service).
    pub has_resolution: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConnectionFailure {
    pub fn new(code: FailureCode) -> Self {
        Self {
            code,
            has_resolution: false,
            message: None,
        }
    }

    pub fn with_resolution(mut self) -> Self {
        self.has_resolution = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// A later attempt may succeed without code changes.
    pub fn is_recoverable(&self) -> bool {
        self.has_resolution
            || matches!(
                self.code,
                FailureCode::ServiceUpdating | FailureCode::NetworkError | FailureCode::Timeout
            )
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// Something able to show the user a fix for a failed connection.
///
/// Only contexts with a user-facing surface provide one; background
/// services run without it.
pub trait ResolutionSurface: Send + Sync {
    /// Offer a resolution for `failure`. Returns whether anything was shown.
    fn show_resolution(&self, failure: &ConnectionFailure) -> bool;
}
