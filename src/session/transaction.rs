use super::*;

use crate::error::ErrorKind;

/// How a multi-step command sequence is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Pause between consecutive commands; the session's pacing when `None`.
    pub pacing: Option<Duration>,
    /// Treat output mentioning an error as a failed step.
    pub check_output: bool,
    /// Per-command timeout; the session default when `None`.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pacing: None,
            check_output: true,
            timeout: None,
        }
    }
}

impl BatchOptions {
    /// Paced execution without output inspection, as used for ONU maintenance.
    pub fn unchecked() -> Self {
        Self {
            check_output: false,
            ..Self::default()
        }
    }
}

/// One executed command of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchStep {
    pub index: usize,
    pub command: String,
    pub output: String,
    pub success: bool,
}

/// Execution result of a multi-step command sequence.
///
/// Steps are never rolled back. When `failed_step` is set, every step before
/// it has been applied on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchReport {
    /// Input batch name.
    pub name: String,
    /// True when all steps succeeded.
    pub completed: bool,
    /// Executed steps in order, the failed one included.
    pub steps: Vec<BatchStep>,
    /// First failed step index, if any.
    pub failed_step: Option<usize>,
    pub failure_reason: Option<String>,
    /// Set when the failure was an error rather than suspicious output.
    pub error_kind: Option<ErrorKind>,
    /// Read timeout that expired, when the failure was a timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// `CMD > ` / `LOG < ` / `ERROR < ` lines up to the point of failure.
    pub log: Vec<String>,
    /// JSONL export of the session recording, taken when the batch failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_record: Option<String>,
}

impl BatchReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            completed: false,
            steps: Vec::new(),
            failed_step: None,
            failure_reason: None,
            error_kind: None,
            timeout_secs: None,
            log: Vec::new(),
            session_record: None,
        }
    }

    pub(super) fn succeed(&mut self, index: usize, command: &str, output: String) {
        self.steps.push(BatchStep {
            index,
            command: command.to_string(),
            output,
            success: true,
        });
    }

    pub(super) fn fail(
        &mut self,
        index: usize,
        command: &str,
        output: String,
        reason: String,
        error: Option<&ConnectError>,
    ) {
        self.steps.push(BatchStep {
            index,
            command: command.to_string(),
            output,
            success: false,
        });
        self.completed = false;
        self.failed_step = Some(index);
        self.failure_reason = Some(reason);
        self.error_kind = error.map(ConnectError::kind);
        self.timeout_secs = match error {
            Some(ConnectError::Timeout { secs, .. }) => Some(*secs),
            _ => None,
        };
    }

    /// Number of steps that were applied successfully.
    pub fn applied_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    /// Output of the last successful step.
    pub fn last_output(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.success)
            .map(|s| s.output.as_str())
    }

    /// Converts a failed report into an error, keeping the step in the message.
    pub fn into_result(self) -> Result<BatchReport, ConnectError> {
        if self.completed {
            return Ok(self);
        }
        let reason = self
            .failure_reason
            .clone()
            .unwrap_or_else(|| format!("batch {} did not complete", self.name));
        Err(match self.error_kind {
            Some(ErrorKind::Timeout) => ConnectError::Timeout {
                secs: self.timeout_secs.unwrap_or_default(),
                partial: reason,
            },
            Some(ErrorKind::Connection) => ConnectError::ConnectionClosed(reason),
            _ => ConnectError::InternalServerError(reason),
        })
    }
}

/// Device output that signals a rejected configuration command.
pub fn output_indicates_failure(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    ["error", "invalid", "failed"]
        .iter()
        .any(|marker| lower.contains(marker))
}
