//! Telnet sessions, command execution and connection pooling.
//!
//! This module owns everything that talks to a device: the line transport
//! with Telnet option handling, the per-family login conversation, the command
//! executor and the pool that keeps one logged-in session per host alive.
//!
//! # Main Components
//!
//! - [`ConnectionPool`] - host-keyed session cache with keepalive supervision
//! - [`DeviceSession`] - one logged-in Telnet connection, one command at a time
//! - [`LineTransport`] - prompt-matching reader/writer with pager handling
//! - [`BatchReport`] - outcome of a multi-step command sequence

use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use crate::config::{self, SessionOptions};
use crate::device::{CompiledFamily, DeviceFamily, LoginState};
use crate::error::ConnectError;
use crate::templates::DialectProfile;

pub use login::login;
pub use manager::{ConnectionPool, Connector, PooledSession, TcpConnector};
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use transaction::{BatchOptions, BatchReport, BatchStep, output_indicates_failure};
pub use transport::{LineTransport, TelnetDecoder};

/// Username and password for a device login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The output result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    pub command: String,
    /// Everything read until the prompt, echo included.
    pub raw: String,
    /// Output without echo, prompt and blank lines.
    pub cleaned: String,
    pub elapsed_ms: u64,
}

impl CommandResult {
    fn empty(command: &str) -> Self {
        Self {
            command: command.to_string(),
            raw: String::new(),
            cleaned: String::new(),
            elapsed_ms: 0,
        }
    }
}

/// Lifecycle of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, login not finished.
    ///
    /// A [`DeviceSession`] only exists once login succeeded, so
    /// [`DeviceSession::state`] reports `Ready` or `Dead`; a connection still
    /// logging in is owned by the pool's creation step and not yet visible.
    Fresh,
    Ready,
    /// Stream closed by either side or a command timed out. Never handed out
    /// again.
    Dead,
}

/// One logged-in Telnet connection to one device.
///
/// Commands are serialized by an internal mutex; the session is shared as
/// `Arc<DeviceSession>` between the pool, the keepalive task and callers.
pub struct DeviceSession {
    host: String,
    username: String,

    /// SHA-256 hash of the password, used for connection parameter comparison
    password_hash: [u8; 32],

    family: DeviceFamily,
    dialect: Arc<CompiledFamily>,
    profile: Arc<DialectProfile>,
    io: Mutex<SessionIo>,
    created: Instant,

    /// Milliseconds after `created` of the last command or keepalive.
    last_activity_ms: AtomicU64,
    dead: AtomicBool,
    /// Set by the I/O task when the device closes the stream.
    stream_closed: Arc<AtomicBool>,
    recorder: SessionRecorder,
    options: SessionOptions,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// State guarded by the session mutex.
struct SessionIo {
    transport: LineTransport,
}

mod client;
mod login;
mod manager;
mod recording;
mod transaction;
mod transport;
