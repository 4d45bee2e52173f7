use super::*;

use std::sync::atomic::Ordering;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::device::IGNORE_START_LINE;
use crate::templates::{Action, TemplateParams};

impl DeviceSession {
    /// Connects to `host` over TCP and logs in.
    pub async fn connect(
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
        profile: Arc<DialectProfile>,
        options: SessionOptions,
        recorder: SessionRecorder,
    ) -> Result<DeviceSession, ConnectError> {
        let dialect = profile.family(family)?;
        let transport = LineTransport::connect(
            host,
            options.port,
            options.connect_timeout,
            dialect.pagination.clone(),
        )
        .await?;
        Self::establish(transport, host, credentials, family, profile, options, recorder).await
    }

    /// Logs in over an already connected stream.
    pub async fn with_stream<S>(
        stream: S,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
        profile: Arc<DialectProfile>,
        options: SessionOptions,
        recorder: SessionRecorder,
    ) -> Result<DeviceSession, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let dialect = profile.family(family)?;
        let transport = LineTransport::spawn(stream, host, dialect.pagination.clone());
        Self::establish(transport, host, credentials, family, profile, options, recorder).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn establish(
        mut transport: LineTransport,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
        profile: Arc<DialectProfile>,
        options: SessionOptions,
        recorder: SessionRecorder,
    ) -> Result<DeviceSession, ConnectError> {
        let dialect = profile.family(family)?;
        let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
            host: host.to_string(),
            family,
        });

        if let Err(err) = login(
            &mut transport,
            &dialect,
            credentials,
            options.login_timeout,
            &recorder,
        )
        .await
        {
            warn!("{} login failed: {}", host, err);
            transport.close();
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: err.to_string(),
            });
            return Err(err);
        }

        let stream_closed = transport.closed_flag();
        let session = DeviceSession {
            host: host.to_string(),
            username: credentials.username.clone(),
            password_hash: Self::calculate_password_hash(&credentials.password),
            family,
            dialect,
            profile,
            io: Mutex::new(SessionIo { transport }),
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            dead: AtomicBool::new(false),
            stream_closed,
            recorder,
            options,
        };

        for command in session.dialect.post_login.clone() {
            session.execute(&command).await?;
        }
        debug!("{} session ready ({})", session.host, family);
        Ok(session)
    }

    /// Calculates SHA-256 hash of the password.
    fn calculate_password_hash(password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }

    /// Checks if the session was opened with these credentials.
    pub fn matches_credentials(&self, credentials: &Credentials) -> bool {
        if self.username != credentials.username {
            debug!("{} username mismatch", self.host);
            return false;
        }
        // Compare password hash
        if self.password_hash != Self::calculate_password_hash(&credentials.password) {
            debug!("{} password hash mismatch", self.host);
            return false;
        }
        true
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn profile(&self) -> &Arc<DialectProfile> {
        &self.profile
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Command log of this session.
    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn state(&self) -> SessionState {
        if self.dead.load(Ordering::Acquire) || self.stream_closed.load(Ordering::Acquire) {
            SessionState::Dead
        } else {
            SessionState::Ready
        }
    }

    /// True until the device hangs up, a failure marks the session dead or
    /// [`DeviceSession::close`] is called.
    pub fn is_alive(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub(crate) fn mark_dead(&self, reason: &str) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            info!("{} session marked dead: {}", self.host, reason);
            let _ = self.recorder.record_event(SessionEvent::ConnectionClosed {
                reason: reason.to_string(),
            });
        }
    }

    /// Time since the last command or keepalive.
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(last)
    }

    /// Records activity now.
    pub fn touch(&self) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Release);
    }

    /// Executes a command with the session's default timeout.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, ConnectError> {
        self.execute_with_timeout(command, self.options.command_timeout)
            .await
    }

    /// Executes a command and waits for the full output by matching the prompt.
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ConnectError> {
        if command.trim().is_empty() {
            return Ok(CommandResult::empty(command));
        }
        let mut io = self.io.lock().await;
        self.execute_locked(&mut io, command, timeout).await
    }

    async fn execute_locked(
        &self,
        io: &mut SessionIo,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ConnectError> {
        if command.trim().is_empty() {
            return Ok(CommandResult::empty(command));
        }
        if !self.is_alive() {
            return Err(ConnectError::SessionClosed);
        }

        let started = Instant::now();
        self.touch();

        // 1. Clear any residual data in the receiver
        io.transport.discard_pending();

        // 2. Send command and read until the shell prompt
        let prompt = &self.dialect.shell_prompt;
        let result = match io.transport.write_line(command) {
            Ok(()) => {
                io.transport
                    .read_until(|data| prompt.is_match(data), timeout)
                    .await
            }
            Err(err) => Err(err),
        };

        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                let _ = self.recorder.record_event(SessionEvent::CommandFailed {
                    command: command.to_string(),
                    reason: err.to_string(),
                });
                if err.should_evict() {
                    self.mark_dead(&err.to_string());
                }
                return Err(err);
            }
        };
        self.touch();

        let cleaned = clean_output(&raw);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let _ = self.recorder.record_raw_chunk(raw.clone());
        let _ = self.recorder.record_event(SessionEvent::CommandOutput {
            command: command.to_string(),
            output: cleaned.clone(),
            elapsed_ms,
        });
        trace!("{} {:?} took {}ms", self.host, command, elapsed_ms);

        Ok(CommandResult {
            command: command.to_string(),
            raw,
            cleaned,
            elapsed_ms,
        })
    }

    /// Renders and runs every command of `action`, returning the last result.
    ///
    /// All commands run under one lock, so a configuration sequence is never
    /// interleaved with another caller's command.
    pub async fn run(
        &self,
        action: Action,
        params: &TemplateParams,
    ) -> Result<CommandResult, ConnectError> {
        let commands = self.profile.commands(self.family, action, params)?;
        let timeout = action.timeout().max(self.options.command_timeout);
        debug!("{} running {} ({} commands)", self.host, action, commands.len());

        let mut io = self.io.lock().await;
        let mut last = CommandResult::empty("");
        for command in &commands {
            last = self.execute_locked(&mut io, command, timeout).await?;
        }
        Ok(last)
    }

    /// Runs an ordered list of commands, stopping at the first failure.
    ///
    /// Nothing is rolled back: steps before the failure stay applied on the
    /// device, and the report says exactly which ones ran.
    pub async fn run_batch(
        &self,
        name: &str,
        commands: &[String],
        options: &BatchOptions,
    ) -> BatchReport {
        let timeout = options.timeout.unwrap_or(self.options.command_timeout);
        let pacing = options.pacing.unwrap_or(self.options.pacing);
        let mut report = BatchReport::new(name);
        let mut io = self.io.lock().await;

        for (index, command) in commands.iter().enumerate() {
            if index > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            report.log.push(format!("CMD > {command}"));
            match self.execute_locked(&mut io, command, timeout).await {
                Ok(result) => {
                    if !result.cleaned.is_empty() {
                        report.log.push(format!("LOG < {}", result.cleaned));
                    }
                    if options.check_output && output_indicates_failure(&result.cleaned) {
                        let reason = format!(
                            "step[{index}] command failed: '{command}' output='{}'",
                            result.cleaned
                        );
                        report.log.push(format!("ERROR < {}", result.cleaned));
                        let _ = self.recorder.record_event(SessionEvent::CommandFailed {
                            command: command.clone(),
                            reason: reason.clone(),
                        });
                        report.fail(index, command, result.cleaned, reason, None);
                        report.session_record = self.recorder.to_jsonl().ok();
                        return report;
                    }
                    report.succeed(index, command, result.cleaned);
                }
                Err(err) => {
                    let reason = format!("step[{index}] command error: {err}");
                    report.log.push(format!("ERROR < {err}"));
                    report.fail(index, command, String::new(), reason, Some(&err));
                    report.session_record = self.recorder.to_jsonl().ok();
                    return report;
                }
            }
        }

        report.completed = true;
        debug!("{} batch {} completed ({} steps)", self.host, name, report.steps.len());
        report
    }

    /// Sends a newline when the session has been idle longer than `threshold`.
    ///
    /// Returns `Ok(false)` when nothing was sent, either because the session
    /// is busy with a command or because it was used recently. The device's
    /// answer is read up to the shell prompt before the lock is released, so
    /// it never reaches the next command.
    pub async fn keepalive(&self, threshold: Duration) -> Result<bool, ConnectError> {
        if !self.is_alive() {
            return Err(ConnectError::SessionClosed);
        }
        let idle = self.idle();
        if idle <= threshold {
            return Ok(false);
        }
        let Ok(mut io) = self.io.try_lock() else {
            trace!("{} busy, skipping keepalive", self.host);
            return Ok(false);
        };
        io.transport.discard_pending();
        let prompt = &self.dialect.shell_prompt;
        let result = match io.transport.write_line("") {
            Ok(()) => {
                io.transport
                    .read_until(|data| prompt.is_match(data), config::KEEPALIVE_REPLY_TIMEOUT)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("{} keepalive failed: {}", self.host, err);
            self.mark_dead(&format!("keepalive failed: {err}"));
            return Err(err);
        }
        self.touch();
        let _ = self.recorder.record_event(SessionEvent::Keepalive {
            idle_ms: idle.as_millis() as u64,
        });
        trace!("{} keepalive answered after {:?} idle", self.host, idle);
        Ok(true)
    }

    /// Sends `exit` and closes the stream.
    pub async fn close(&self) {
        let mut io = self.io.lock().await;
        if self.is_alive() && io.transport.is_open() {
            if let Err(e) = io.transport.write_line("exit") {
                debug!("{} failed to send exit command: {:?}", self.host, e);
            }
            // Give some time for command execution
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        io.transport.close();
        self.mark_dead("client_close_called");
        debug!("{} Telnet connection closed", self.host);
    }
}

/// Strips the command echo and trailing prompt from raw device output.
///
/// With more than two lines the first (echo) and last (prompt) are dropped;
/// the rest is trimmed and blank lines removed. Two lines or fewer carry no
/// output at all.
pub fn clean_output(raw: &str) -> String {
    let lines = split_lines(raw);
    if lines.len() <= 2 {
        return String::new();
    }
    lines[1..lines.len() - 1]
        .iter()
        .map(|line| IGNORE_START_LINE.replace(line, ""))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits on `\r\n`, `\r` or `\n`; a trailing terminator does not start a new line.
fn split_lines(raw: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                lines.push(&raw[start..i]);
                i += 2;
                start = i;
            }
            b'\r' | b'\n' => {
                lines.push(&raw[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < raw.len() {
        lines.push(&raw[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::{clean_output, split_lines};

    #[test]
    fn short_output_is_empty() {
        assert_eq!(clean_output(""), "");
        assert_eq!(clean_output("show clock\r\nZXAN#"), "");
    }

    #[test]
    fn echo_and_prompt_are_dropped() {
        let raw = "cmd echo\r\nline1\r\n\r\n   line2  \r\nprompt>";
        assert_eq!(clean_output(raw), "line1\nline2");
    }

    #[test]
    fn pager_erasure_is_removed() {
        let raw = "show run\r\nline1\r\n\u{8}\u{8}\u{8}   \u{8}\u{8}\u{8}line2\r\nZXAN#";
        assert_eq!(clean_output(raw), "line1\nline2");
    }

    #[test]
    fn split_lines_behaves_like_splitlines() {
        assert_eq!(split_lines("a\r\nb\rc\n"), vec!["a", "b", "c"]);
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
        assert!(split_lines("").is_empty());
    }
}
