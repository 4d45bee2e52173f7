//! Error types for Telnet sessions, device dialects and provisioning.
//!
//! Every failure the engine can surface maps onto a small closed set of
//! [`ErrorKind`]s. Callers (an HTTP layer, a CLI) branch on the kind instead of
//! on the concrete variant, and the connection pool uses [`ConnectError::should_evict`]
//! to decide whether a session can still be reused.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket-level or login failure. The session is unusable.
    Connection,
    /// No response within the bound. Device state is ambiguous.
    Timeout,
    /// A referenced entity (serial number, site, interface) was not found.
    Lookup,
    /// Resource exhaustion on the device, e.g. no free ONU id.
    Capacity,
    /// Anything else: bad configuration, renderer failure, internal bugs.
    Internal,
}

impl ErrorKind {
    /// Status code an HTTP boundary should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Connection | ErrorKind::Timeout => 504,
            ErrorKind::Lookup => 404,
            ErrorKind::Capacity | ErrorKind::Internal => 500,
        }
    }
}

/// Errors that can occur while talking to a device.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// TCP connect failed or the socket broke while writing.
    #[error("connection to {host} failed: {reason}")]
    ConnectionFailed { host: String, reason: String },

    /// The device closed the stream before the expected text arrived.
    ///
    /// Carries whatever was read before EOF.
    #[error("connection closed by peer: {0}")]
    ConnectionClosed(String),

    /// Login did not reach the shell prompt.
    #[error("login to {host} failed in state {state}: {reason}")]
    LoginFailed {
        host: String,
        state: String,
        reason: String,
    },

    /// No match arrived within the read timeout.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("timed out after {secs}s waiting for device output: {partial}")]
    Timeout { secs: u64, partial: String },

    /// The session was already evicted or closed.
    #[error("session closed")]
    SessionClosed,

    /// A serial number, site or interface could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The PON port has no free ONU id left.
    #[error("pon port {interface} is full (no onu id below {limit})")]
    CapacityExhausted { interface: String, limit: u32 },

    /// The requested action has no command template for the device family.
    #[error("action {action} is not supported on {family}")]
    UnsupportedAction { action: String, family: String },

    /// The dialect table is missing a required family/action combination.
    #[error("invalid dialect profile: {0}")]
    InvalidDialect(String),

    /// A template placeholder had no value.
    #[error("template '{template}' is missing parameter '{param}'")]
    MissingParameter { template: String, param: String },

    /// An interface string could not be split into base and onu id.
    #[error("invalid interface '{0}', expected something like 1/1/1:1")]
    InvalidInterface(String),

    /// A bandwidth package is not in the inventory.
    #[error("unknown package '{0}'")]
    UnknownPackage(String),

    /// The external command renderer failed.
    #[error("command rendering failed: {0}")]
    RenderFailed(#[from] anyhow::Error),

    /// Inventory or dialect JSON could not be decoded.
    #[error("invalid configuration json: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// Raw socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violated (poisoned lock, cache miss).
    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl ConnectError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::ConnectionFailed { .. }
            | ConnectError::ConnectionClosed(_)
            | ConnectError::LoginFailed { .. }
            | ConnectError::SessionClosed
            | ConnectError::Io(_) => ErrorKind::Connection,
            ConnectError::Timeout { .. } => ErrorKind::Timeout,
            ConnectError::NotFound(_) => ErrorKind::Lookup,
            ConnectError::CapacityExhausted { .. } => ErrorKind::Capacity,
            ConnectError::UnsupportedAction { .. }
            | ConnectError::InvalidDialect(_)
            | ConnectError::MissingParameter { .. }
            | ConnectError::InvalidInterface(_)
            | ConnectError::UnknownPackage(_)
            | ConnectError::RenderFailed(_)
            | ConnectError::InvalidConfig(_)
            | ConnectError::InternalServerError(_) => ErrorKind::Internal,
        }
    }

    /// True when the session that produced this error must not be reused.
    pub fn should_evict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Timeout)
    }

    /// Shorthand for `self.kind().http_status()`.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}
