use super::*;

use crate::device::{CompiledLoginStep, LoginInput, contains_any};

/// Times a deflection question may be answered before login gives up.
const MAX_DEFLECTIONS: usize = 3;

/// Drives a login script until the shell prompt shows up.
///
/// Each step waits at most `step_timeout`. Returns the text that carried the
/// shell prompt. Any failure is reported as [`ConnectError::LoginFailed`] with
/// the state the conversation was stuck in.
pub async fn login(
    transport: &mut LineTransport,
    dialect: &CompiledFamily,
    credentials: &Credentials,
    step_timeout: Duration,
    recorder: &SessionRecorder,
) -> Result<String, ConnectError> {
    let host = transport.peer().to_string();
    let mut state = LoginState::AwaitingUserPrompt;
    let mut prompt_text = String::new();

    let fail = |state: LoginState, err: ConnectError| {
        let reason = match err {
            ConnectError::Timeout { secs, partial } => {
                format!("no expected prompt within {secs}s, got {partial:?}")
            }
            ConnectError::ConnectionClosed(partial) => {
                format!("connection closed by device after {partial:?}")
            }
            other => other.to_string(),
        };
        ConnectError::LoginFailed {
            host: host.clone(),
            state: state.to_string(),
            reason,
        }
    };

    for step in &dialect.login {
        match step {
            CompiledLoginStep::Settle(delay) => {
                trace!("{} settling for {:?}", host, delay);
                tokio::time::sleep(*delay).await;
            }
            CompiledLoginStep::Expect {
                state: next,
                any_of,
                send,
            } => {
                enter(&mut state, *next, &host, recorder);
                transport
                    .read_until(|data| contains_any(data, any_of), step_timeout)
                    .await
                    .map_err(|e| fail(state, e))?;
                let input = match send {
                    LoginInput::Username => credentials.username.as_str(),
                    LoginInput::Password => credentials.password.as_str(),
                    LoginInput::Literal(text) => text.as_str(),
                };
                transport.write_line(input).map_err(|e| fail(state, e))?;
                if *send == LoginInput::Username {
                    enter(&mut state, LoginState::AwaitingPasswordPrompt, &host, recorder);
                }
            }
            CompiledLoginStep::AwaitPrompt { pattern, deflect } => {
                enter(&mut state, LoginState::AwaitingShellPrompt, &host, recorder);
                let mut deflections = 0;
                loop {
                    let data = transport
                        .read_until(
                            |data| {
                                pattern.is_match(data)
                                    || deflect
                                        .as_ref()
                                        .is_some_and(|d| all_present(data, &d.markers))
                            },
                            step_timeout,
                        )
                        .await
                        .map_err(|e| fail(state, e))?;

                    if pattern.is_match(&data) {
                        prompt_text = data;
                        break;
                    }
                    // Only the deflection can have matched here.
                    let Some(deflection) = deflect.as_ref() else {
                        break;
                    };
                    deflections += 1;
                    enter(
                        &mut state,
                        LoginState::AwaitingPasswordChangeDecision,
                        &host,
                        recorder,
                    );
                    if deflections > MAX_DEFLECTIONS {
                        return Err(fail(
                            state,
                            ConnectError::InternalServerError(format!(
                                "device kept asking {:?}",
                                deflection.markers
                            )),
                        ));
                    }
                    debug!("{} answering login question with {:?}", host, deflection.answer);
                    transport
                        .write_line(&deflection.answer)
                        .map_err(|e| fail(state, e))?;
                    enter(&mut state, LoginState::AwaitingShellPrompt, &host, recorder);
                }
            }
        }
    }

    enter(&mut state, LoginState::Ready, &host, recorder);
    info!("{} login successful", host);
    Ok(prompt_text)
}

fn enter(state: &mut LoginState, next: LoginState, host: &str, recorder: &SessionRecorder) {
    if *state == next {
        return;
    }
    trace!("{} login {} -> {}", host, state, next);
    *state = next;
    let _ = recorder.record_event(SessionEvent::LoginStateChanged { state: next });
}

fn all_present(haystack: &str, lowered: &[String]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    lowered.iter().all(|m| lower.contains(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FamilyProfile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn read_line(device: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            device.read_exact(&mut byte).await.expect("read from client");
            if byte[0] == b'\n' {
                return String::from_utf8_lossy(&line).into_owned();
            }
            line.push(byte[0]);
        }
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "secret")
    }

    #[tokio::test]
    async fn olt_login_reaches_ready() {
        let dialect = FamilyProfile::builtin(DeviceFamily::C300)
            .compile()
            .expect("compile");
        let (client, mut device) = tokio::io::duplex(1024);
        let mut transport = LineTransport::spawn(client, "olt", dialect.pagination.clone());
        let recorder = SessionRecorder::default();

        let device_task = tokio::spawn(async move {
            device.write_all(b"\r\nUsername:").await.expect("write");
            assert_eq!(read_line(&mut device).await, "admin");
            device.write_all(b"Password:").await.expect("write");
            assert_eq!(read_line(&mut device).await, "secret");
            device.write_all(b"\r\nZXAN#").await.expect("write");
            device
        });

        let prompt = login(&mut transport, &dialect, &creds(), Duration::from_secs(5), &recorder)
            .await
            .expect("login");
        assert!(prompt.ends_with("ZXAN#"));
        let _device = device_task.await.expect("device");

        let states: Vec<_> = recorder
            .entries()
            .expect("entries")
            .into_iter()
            .filter_map(|e| match e.event {
                SessionEvent::LoginStateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                LoginState::AwaitingPasswordPrompt,
                LoginState::AwaitingShellPrompt,
                LoginState::Ready
            ]
        );
    }

    #[tokio::test]
    async fn huawei_password_change_question_is_declined() {
        let dialect = FamilyProfile::builtin(DeviceFamily::Huawei)
            .compile()
            .expect("compile");
        let (client, mut device) = tokio::io::duplex(1024);
        let mut transport = LineTransport::spawn(client, "sw", dialect.pagination.clone());

        let device_task = tokio::spawn(async move {
            device.write_all(b"Login authentication\r\n\r\nUsername:").await.expect("write");
            read_line(&mut device).await;
            device.write_all(b"Password:").await.expect("write");
            read_line(&mut device).await;
            device
                .write_all(b"\r\nThe password needs to be changed. Change now? [Y/N]:")
                .await
                .expect("write");
            let answer = read_line(&mut device).await;
            device.write_all(b"\r\n<ATN-SW01>").await.expect("write");
            (device, answer)
        });

        login(
            &mut transport,
            &dialect,
            &creds(),
            Duration::from_secs(5),
            &SessionRecorder::default(),
        )
        .await
        .expect("login");
        let (_device, answer) = device_task.await.expect("device");
        assert_eq!(answer, "n");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_fails_in_user_prompt_state() {
        let dialect = FamilyProfile::builtin(DeviceFamily::Cisco)
            .compile()
            .expect("compile");
        let (client, _device) = tokio::io::duplex(1024);
        let mut transport = LineTransport::spawn(client, "sw", dialect.pagination.clone());

        let err = login(
            &mut transport,
            &dialect,
            &creds(),
            Duration::from_secs(20),
            &SessionRecorder::default(),
        )
        .await
        .expect_err("must time out");
        match err {
            ConnectError::LoginFailed { state, .. } => {
                assert_eq!(state, "awaiting_user_prompt")
            }
            other => panic!("unexpected {other}"),
        }
    }
}
