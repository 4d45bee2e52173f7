mod common;

use common::{DeviceScript, open_session, profile, spawn_device};
use gponctl::config::SessionOptions;
use gponctl::device::DeviceFamily;
use gponctl::error::{ConnectError, ErrorKind};
use gponctl::session::{
    Credentials, DeviceSession, SessionEvent, SessionRecordLevel, SessionRecorder,
};

#[tokio::test]
async fn c300_login_negotiates_and_disables_paging() {
    let mut script = DeviceScript::new(DeviceFamily::C300);
    script.negotiate = true;
    let (session, log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    assert!(session.is_alive());
    assert_eq!(session.family(), DeviceFamily::C300);
    assert_eq!(log.lines(), vec!["terminal length 0"]);

    let entries = session.recorder().entries().expect("entries");
    assert!(matches!(
        entries.first().map(|e| &e.event),
        Some(SessionEvent::ConnectionEstablished { family: DeviceFamily::C300, .. })
    ));
}

#[tokio::test]
async fn c600_login_uses_olt_dialect() {
    let script = DeviceScript::new(DeviceFamily::C600).respond("show card", "1  1  GFGM  INSERVICE");
    let (session, _log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");
    let result = session.execute("show card").await.expect("show card");
    assert_eq!(result.cleaned, "1  1  GFGM  INSERVICE");
}

#[tokio::test]
async fn huawei_password_change_question_is_declined() {
    let mut script = DeviceScript::new(DeviceFamily::Huawei)
        .respond("display interface description", "GE0/0/1  up  up  UPLINK");
    script.ask_password_change = true;
    let (session, log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    assert_eq!(log.lines(), vec!["password-change:n"]);
    let result = session
        .execute("display interface description")
        .await
        .expect("command");
    assert_eq!(result.cleaned, "GE0/0/1  up  up  UPLINK");
}

#[tokio::test]
async fn cisco_login_reaches_privileged_prompt() {
    let script = DeviceScript::new(DeviceFamily::Cisco)
        .respond("show interface description", "Gi0/1  up  up  OLT-KAUMAN");
    let (session, log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    let result = session
        .execute("show interface description")
        .await
        .expect("command");
    assert_eq!(result.cleaned, "Gi0/1  up  up  OLT-KAUMAN");
    assert_eq!(log.lines(), vec!["show interface description"]);
}

#[tokio::test(start_paused = true)]
async fn ruijie_login_enters_enable_mode() {
    let (session, log) = open_session(
        DeviceScript::new(DeviceFamily::Ruijie),
        SessionOptions::default(),
    )
    .await
    .expect("login");

    assert!(session.is_alive());
    assert_eq!(log.lines(), vec!["enable:en"]);
}

#[tokio::test]
async fn rejected_credentials_fail_login() {
    let (stream, _log) = spawn_device(DeviceScript::new(DeviceFamily::C300));
    let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
    let result = DeviceSession::with_stream(
        stream,
        "10.0.0.1",
        &Credentials::new("admin", "wrong"),
        DeviceFamily::C300,
        profile(),
        SessionOptions::default(),
        recorder,
    )
    .await;

    let err = match result {
        Ok(_) => panic!("login with a wrong password must fail"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Connection);
    match err {
        ConnectError::LoginFailed { host, state, .. } => {
            assert_eq!(host, "10.0.0.1");
            assert_eq!(state, "awaiting_shell_prompt");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn olt_family_on_switch_session_is_rejected() {
    let (session, _log) = open_session(
        DeviceScript::new(DeviceFamily::Cisco),
        SessionOptions::default(),
    )
    .await
    .expect("login");
    let err = match gponctl::olt::Olt::new(std::sync::Arc::new(session)) {
        Ok(_) => panic!("a switch is not an OLT"),
        Err(err) => err,
    };
    assert!(matches!(err, ConnectError::UnsupportedAction { .. }));
}
