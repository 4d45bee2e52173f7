mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DeviceScript, open_session};
use gponctl::config::SessionOptions;
use gponctl::device::DeviceFamily;
use gponctl::error::{ConnectError, ErrorKind};
use gponctl::olt::Olt;
use gponctl::session::{BatchOptions, SessionState};
use gponctl::switch::Switch;
use gponctl::templates::{Action, TemplateParams};

async fn olt(script: DeviceScript) -> (Olt, common::DeviceLog) {
    let (session, log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");
    (Olt::new(Arc::new(session)).expect("olt"), log)
}

#[tokio::test]
async fn paged_output_is_reassembled() {
    let script = DeviceScript::new(DeviceFamily::C300).respond_paged(
        "show running-config interface gpon-olt_1/2/3",
        &[
            "Building configuration...\ninterface gpon-olt_1/2/3\n  name KAUMAN-P3",
            "  onu 1 type ALL sn ZTEGC1111111\n  onu 2 type ALL sn ZTEGC2222222",
            "!\nend",
        ],
    );
    let (olt, log) = olt(script).await;

    let config = olt.running_config("1/2/3").await.expect("running config");
    assert_eq!(
        config,
        "Building configuration...\n\
         interface gpon-olt_1/2/3\n\
         name KAUMAN-P3\n\
         onu 1 type ALL sn ZTEGC1111111\n\
         onu 2 type ALL sn ZTEGC2222222\n\
         !\n\
         end"
    );
    assert_eq!(log.count("<pager>"), 2);
}

#[tokio::test]
async fn output_is_cleaned_of_echo_prompt_and_blank_lines() {
    let script = DeviceScript::new(DeviceFamily::C300)
        .respond("show card", "\nRack Shelf Slot CfgType\n\n1    1     2    GTGO\n");
    let (olt, _log) = olt(script).await;

    let result = olt.session().execute("show card").await.expect("show card");
    assert!(result.raw.starts_with("show card\r\n"));
    assert!(result.raw.ends_with("ZXAN#"));
    assert_eq!(result.cleaned, "Rack Shelf Slot CfgType\n1    1     2    GTGO");
}

#[tokio::test]
async fn empty_command_does_no_io() {
    let (olt, log) = olt(DeviceScript::new(DeviceFamily::C300)).await;
    let result = olt.session().execute("   ").await.expect("empty command");
    assert_eq!(result.cleaned, "");
    assert_eq!(result.elapsed_ms, 0);
    assert_eq!(log.lines(), vec!["terminal length 0"]);
}

#[tokio::test]
async fn concurrent_actions_are_not_interleaved() {
    let script = DeviceScript::new(DeviceFamily::C300).respond("show card", "1  1  GTGO");
    let (olt, log) = olt(script).await;

    let rebooter = olt.clone();
    let reboot = tokio::spawn(async move { rebooter.reboot_onu("1/2/3:4").await });
    let reader = olt.clone();
    let card = tokio::spawn(async move { reader.session().execute("show card").await });

    let report = reboot.await.expect("join").expect("reboot");
    assert!(report.completed);
    let card = card.await.expect("join").expect("show card");
    assert_eq!(card.cleaned, "1  1  GTGO");

    let lines = log.lines();
    let start = lines
        .iter()
        .position(|l| l == "configure terminal")
        .expect("config prefix sent");
    assert_eq!(
        &lines[start..start + 4],
        &[
            "configure terminal".to_string(),
            "pon-onu-mng gpon-onu_1/2/3:4".to_string(),
            "reboot".to_string(),
            "exit".to_string(),
        ]
    );
    assert_eq!(log.count("show card"), 1);
}

#[tokio::test]
async fn delete_onu_sends_interface_sequence() {
    let (olt, log) = olt(DeviceScript::new(DeviceFamily::C300)).await;

    let report = olt.delete_onu("gpon-onu_1/2/3:4").await.expect("delete");
    assert!(report.completed);
    assert_eq!(report.applied_steps(), 5);
    assert_eq!(
        log.lines()[1..],
        [
            "configure terminal",
            "interface gpon-olt_1/2/3",
            "no onu 4",
            "exit",
            "exit",
        ]
    );
}

#[tokio::test]
async fn c600_change_sn_uses_c600_interface_names() {
    let (olt, log) = olt(DeviceScript::new(DeviceFamily::C600)).await;

    let report = olt
        .change_sn("1/3/1:7", " ZTEGC8D12345 ")
        .await
        .expect("change sn");
    assert!(report.completed);
    assert!(log.lines().contains(&"interface gpon_onu-1/3/1:7".to_string()));
    assert!(log.lines().contains(&"registration-method sn ZTEGC8D12345".to_string()));
}

#[tokio::test]
async fn batch_stops_at_rejected_command() {
    let script = DeviceScript::new(DeviceFamily::C300)
        .respond("onu 4 type ALL sn BAD", "%Error 20201: Invalid parameter");
    let (olt, log) = olt(script).await;

    let commands = vec![
        "interface gpon-olt_1/2/3".to_string(),
        "onu 4 type ALL sn BAD".to_string(),
        "exit".to_string(),
    ];
    let options = BatchOptions {
        pacing: Some(Duration::ZERO),
        ..BatchOptions::default()
    };
    let report = olt.session().run_batch("provision", &commands, &options).await;

    assert!(!report.completed);
    assert_eq!(report.failed_step, Some(1));
    assert_eq!(report.applied_steps(), 1);
    assert!(report.error_kind.is_none());
    assert!(
        report
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("step[1] command failed: 'onu 4 type ALL sn BAD'"))
    );
    assert_eq!(
        report.log,
        vec![
            "CMD > interface gpon-olt_1/2/3",
            "CMD > onu 4 type ALL sn BAD",
            "LOG < %Error 20201: Invalid parameter",
            "ERROR < %Error 20201: Invalid parameter",
        ]
    );
    assert_eq!(log.count("exit"), 0);
    assert!(olt.session().is_alive());
}

#[tokio::test(start_paused = true)]
async fn timeout_marks_session_dead() {
    let mut script = DeviceScript::new(DeviceFamily::C300);
    script.hang_on = Some("show card".to_string());
    let options = SessionOptions {
        command_timeout: Duration::from_secs(5),
        ..SessionOptions::default()
    };
    let (session, _log) = open_session(script, options).await.expect("login");

    let err = session.execute("show card").await.expect_err("no answer");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(session.state(), SessionState::Dead);

    let err = session.execute("show clock").await.expect_err("dead session");
    assert!(matches!(err, ConnectError::SessionClosed));
}

#[tokio::test(start_paused = true)]
async fn slow_keepalive_answer_does_not_leak_into_next_command() {
    let mut script = DeviceScript::new(DeviceFamily::C300).respond("show card", "1  1  GTGO");
    script.newline_delay = Some(Duration::from_millis(50));
    let (session, log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    assert!(!session.keepalive(Duration::from_secs(50)).await.expect("recent"));
    tokio::time::sleep(Duration::from_secs(55)).await;
    assert!(session.keepalive(Duration::from_secs(50)).await.expect("idle"));

    let result = session.execute("show card").await.expect("show card");
    assert_eq!(result.cleaned, "1  1  GTGO");
    assert_eq!(log.count(""), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_keepalive_marks_session_dead() {
    let mut script = DeviceScript::new(DeviceFamily::C300);
    script.hang_on = Some(String::new());
    let (session, _log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    tokio::time::sleep(Duration::from_secs(55)).await;
    let err = session
        .keepalive(Duration::from_secs(50))
        .await
        .expect_err("no prompt");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(session.state(), SessionState::Dead);
}

#[tokio::test]
async fn device_hangup_marks_session_dead() {
    let mut script = DeviceScript::new(DeviceFamily::C300).respond("show card", "1  1  GTGO");
    script.close_after = Some("show card".to_string());
    let (session, _log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");

    let result = session.execute("show card").await.expect("show card");
    assert_eq!(result.cleaned, "1  1  GTGO");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.state(), SessionState::Dead);
    let err = session.execute("show clock").await.expect_err("hung up");
    assert!(matches!(err, ConnectError::SessionClosed));
}

#[tokio::test(start_paused = true)]
async fn run_uses_longer_of_action_and_session_timeout() {
    let dba = "show pon bandwidth dba interface gpon-olt_1/2/3";
    let params = TemplateParams::new().with("interface", "gpon-olt_1/2/3");

    for (command_timeout, expected) in [(5, 30), (60, 60)] {
        let mut script = DeviceScript::new(DeviceFamily::C300);
        script.hang_on = Some(dba.to_string());
        let options = SessionOptions {
            command_timeout: Duration::from_secs(command_timeout),
            ..SessionOptions::default()
        };
        let (session, _log) = open_session(script, options).await.expect("login");

        let err = session
            .run(Action::DbaBandwidth, &params)
            .await
            .expect_err("no answer");
        match err {
            ConnectError::Timeout { secs, .. } => assert_eq!(secs, expected),
            other => panic!("unexpected {other}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn batch_without_pacing_uses_session_pacing() {
    let options = SessionOptions {
        pacing: Duration::from_secs(2),
        ..SessionOptions::default()
    };
    let (session, log) = open_session(DeviceScript::new(DeviceFamily::C300), options)
        .await
        .expect("login");

    let commands = vec![
        "configure terminal".to_string(),
        "interface gpon-olt_1/2/3".to_string(),
        "exit".to_string(),
    ];
    let started = tokio::time::Instant::now();
    let report = session
        .run_batch("pacing", &commands, &BatchOptions::default())
        .await;

    assert!(report.completed);
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.count("exit"), 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_batch_keeps_timeout_and_session_record() {
    let mut script = DeviceScript::new(DeviceFamily::C300);
    script.hang_on = Some("show pon bandwidth dba interface gpon-olt_1/2/3".to_string());
    let options = SessionOptions {
        command_timeout: Duration::from_secs(5),
        ..SessionOptions::default()
    };
    let (session, _log) = open_session(script, options).await.expect("login");

    let commands = vec![
        "show card".to_string(),
        "show pon bandwidth dba interface gpon-olt_1/2/3".to_string(),
    ];
    let batch = BatchOptions {
        pacing: Some(Duration::ZERO),
        ..BatchOptions::default()
    };
    let report = session.run_batch("dba", &commands, &batch).await;

    assert_eq!(report.failed_step, Some(1));
    assert_eq!(report.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(report.timeout_secs, Some(5));
    let record = report.session_record.clone().expect("session record");
    assert!(record.contains("\"kind\":\"command_failed\""));
    assert!(record.contains("show pon bandwidth dba"));
    match report.into_result() {
        Err(ConnectError::Timeout { secs, .. }) => assert_eq!(secs, 5),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn switch_interface_status_uses_dialect_command() {
    let script = DeviceScript::new(DeviceFamily::Huawei).respond(
        "display interface GigabitEthernet0/0/1",
        "GigabitEthernet0/0/1 current state : UP\nDescription: TO-OLT",
    );
    let (session, _log) = open_session(script, SessionOptions::default())
        .await
        .expect("login");
    let switch = Switch::new(Arc::new(session)).expect("switch");

    let status = switch
        .interface_status("GigabitEthernet0/0/1")
        .await
        .expect("status");
    assert_eq!(
        status,
        "GigabitEthernet0/0/1 current state : UP\nDescription: TO-OLT"
    );
}

#[tokio::test]
async fn close_sends_exit_and_kills_session() {
    let (session, log) = open_session(
        DeviceScript::new(DeviceFamily::Cisco),
        SessionOptions::default(),
    )
    .await
    .expect("login");

    session.close().await;
    assert!(!session.is_alive());
    assert_eq!(log.lines(), vec!["exit"]);
}
