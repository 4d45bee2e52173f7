use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record lifecycle and command events.
    #[default]
    KeyEventsOnly,
    /// Also keep the raw device output of every command.
    Full,
}

/// Entries kept per session before the oldest are dropped.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        host: String,
        family: DeviceFamily,
    },
    LoginStateChanged {
        state: LoginState,
    },
    CommandOutput {
        command: String,
        output: String,
        elapsed_ms: u64,
    },
    CommandFailed {
        command: String,
        reason: String,
    },
    Keepalive {
        idle_ms: u64,
    },
    ConnectionClosed {
        reason: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same buffer, so the pool, the session and a caller
/// inspecting a failure all see one log.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    max_entries: usize,
    entries: Arc<Mutex<VecDeque<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self::with_capacity(level, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(level: SessionRecordLevel, max_entries: usize) -> Self {
        Self {
            level,
            max_entries: max_entries.max(1),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, VecDeque<SessionRecordEntry>>, ConnectError> {
        self.entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self.lock()?;
        while guard.len() >= self.max_entries {
            guard.pop_front();
        }
        guard.push_back(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw device output when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Commands and their outputs as `CMD > ` / `LOG < ` / `ERROR < ` lines.
    pub fn command_log(&self) -> Result<Vec<String>, ConnectError> {
        let mut log = Vec::new();
        for entry in self.lock()?.iter() {
            match &entry.event {
                SessionEvent::CommandOutput {
                    command, output, ..
                } => {
                    log.push(format!("CMD > {command}"));
                    if !output.is_empty() {
                        log.push(format!("LOG < {output}"));
                    }
                }
                SessionEvent::CommandFailed { command, reason } => {
                    log.push(format!("CMD > {command}"));
                    log.push(format!("ERROR < {reason}"));
                }
                _ => {}
            }
        }
        Ok(log)
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            lines.push(serde_json::to_string(&entry)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        let mut parsed = VecDeque::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)?;
            parsed.push_back(entry);
        }
        *recorder.lock()? = parsed;
        Ok(recorder)
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::default())
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(command: &str, output: &str) -> SessionEvent {
        SessionEvent::CommandOutput {
            command: command.to_string(),
            output: output.to_string(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder.record_event(output("show card", "ok")).expect("record");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder
            .record_raw_chunk("raw-shell-data".to_string())
            .expect("record raw");
        recorder
            .record_event(SessionEvent::LoginStateChanged {
                state: LoginState::Ready,
            })
            .expect("record state");

        let entries = recorder.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0].event,
            SessionEvent::LoginStateChanged { .. }
        ));
    }

    #[test]
    fn bounded_buffer_drops_oldest() {
        let recorder = SessionRecorder::with_capacity(SessionRecordLevel::Full, 2);
        for cmd in ["a", "b", "c"] {
            recorder.record_event(output(cmd, "")).expect("record");
        }
        let log = recorder.command_log().expect("log");
        assert_eq!(log, vec!["CMD > b".to_string(), "CMD > c".to_string()]);
    }

    #[test]
    fn command_log_marks_failures() {
        let recorder = SessionRecorder::default();
        recorder
            .record_event(output("interface gpon-olt_1/2/3", "done"))
            .expect("record");
        recorder
            .record_event(SessionEvent::CommandFailed {
                command: "onu 4 type ALL sn ZTEG1".to_string(),
                reason: "%Error 20201: Invalid".to_string(),
            })
            .expect("record");
        assert_eq!(
            recorder.command_log().expect("log"),
            vec![
                "CMD > interface gpon-olt_1/2/3",
                "LOG < done",
                "CMD > onu 4 type ALL sn ZTEG1",
                "ERROR < %Error 20201: Invalid",
            ]
        );
    }

    #[test]
    fn jsonl_export_restores_events() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::ConnectionEstablished {
                host: "10.0.0.1".to_string(),
                family: DeviceFamily::C300,
            })
            .expect("record connect");
        recorder.record_event(output("show card", "1 1 GTGO")).expect("record");

        let jsonl = recorder.to_jsonl().expect("jsonl");
        assert!(jsonl.lines().next().is_some_and(|l| l.contains("\"kind\":\"connection_established\"")));

        let restored = SessionRecorder::from_jsonl(&jsonl).expect("restore");
        let events: Vec<_> = restored
            .entries()
            .expect("entries")
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], output("show card", "1 1 GTGO"));
    }
}
