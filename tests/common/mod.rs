//! Scripted in-memory devices for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gponctl::device::DeviceFamily;
use gponctl::error::ConnectError;
use gponctl::session::Connector;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

/// Text a device prints before pausing at the pager.
pub const MORE: &str = "--More--";

/// Behaviour of a fake device.
#[derive(Clone)]
pub struct DeviceScript {
    pub family: DeviceFamily,
    pub prompt: String,
    /// Output pages per command; every page but the last ends at the pager.
    pub responses: HashMap<String, Vec<String>>,
    /// Offer Telnet options before the banner.
    pub negotiate: bool,
    /// Ask the Huawei password-change question after login.
    pub ask_password_change: bool,
    /// The first connection drops the stream when it receives this command.
    pub drop_first_on: Option<String>,
    /// Never answer this command.
    pub hang_on: Option<String>,
    /// The first connection answers this command, then hangs up.
    pub close_after: Option<String>,
    /// Delay before answering an empty line.
    pub newline_delay: Option<Duration>,
}

impl DeviceScript {
    pub fn new(family: DeviceFamily) -> Self {
        let prompt = match family {
            DeviceFamily::C300 | DeviceFamily::C600 => "ZXAN#",
            DeviceFamily::Huawei => "<ATN-SW01>",
            DeviceFamily::Cisco => "COLO-SW01#",
            DeviceFamily::Ruijie => "RJ-SW01#",
        };
        Self {
            family,
            prompt: prompt.to_string(),
            responses: HashMap::new(),
            negotiate: false,
            ask_password_change: false,
            drop_first_on: None,
            hang_on: None,
            close_after: None,
            newline_delay: None,
        }
    }

    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses
            .insert(command.to_string(), vec![output.to_string()]);
        self
    }

    pub fn respond_paged(mut self, command: &str, pages: &[&str]) -> Self {
        self.responses.insert(
            command.to_string(),
            pages.iter().map(|p| p.to_string()).collect(),
        );
        self
    }
}

/// What a fake device saw.
#[derive(Clone, Default)]
pub struct DeviceLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl DeviceLog {
    pub fn push(&self, line: &str) {
        self.lines.lock().expect("device log").push(line.to_string());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("device log").clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.lines().iter().filter(|l| l.as_str() == line).count()
    }
}

/// Reads one line from the client, skipping Telnet negotiation replies.
///
/// Returns `None` on EOF.
async fn read_line(stream: &mut DuplexStream) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.ok()?;
        match byte[0] {
            0xff => {
                let mut rest = [0u8; 2];
                stream.read_exact(&mut rest).await.ok()?;
            }
            b'\n' => return Some(String::from_utf8_lossy(&line).into_owned()),
            b'\r' => {}
            b => line.push(b),
        }
    }
}

async fn read_pager_key(stream: &mut DuplexStream) -> Option<u8> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).await.ok()?;
    Some(byte[0])
}

async fn send(stream: &mut DuplexStream, text: &str) -> Option<()> {
    stream.write_all(text.as_bytes()).await.ok()
}

/// Plays the login conversation of the script's family.
async fn serve_login(script: &DeviceScript, stream: &mut DuplexStream, log: &DeviceLog) -> Option<()> {
    if script.negotiate {
        // IAC WILL ECHO, IAC WILL SGA, IAC DO NAWS
        stream
            .write_all(&[0xff, 0xfb, 0x01, 0xff, 0xfb, 0x03, 0xff, 0xfd, 0x1f])
            .await
            .ok()?;
    }
    let credentials_ok = match script.family {
        DeviceFamily::C300 | DeviceFamily::C600 => {
            send(stream, "\r\n\r\nUsername:").await?;
            let user = read_line(stream).await?;
            send(stream, "Password:").await?;
            let pass = read_line(stream).await?;
            user == USERNAME && pass == PASSWORD
        }
        DeviceFamily::Huawei => {
            send(stream, "Login authentication\r\n\r\nUsername:").await?;
            let user = read_line(stream).await?;
            send(stream, "Password:").await?;
            let pass = read_line(stream).await?;
            if script.ask_password_change {
                send(
                    stream,
                    "\r\nThe password needs to be changed. Change now? [Y/N]:",
                )
                .await?;
                let answer = read_line(stream).await?;
                log.push(&format!("password-change:{answer}"));
            }
            user == USERNAME && pass == PASSWORD
        }
        DeviceFamily::Cisco => {
            send(stream, "\r\nUser Access Verification\r\n\r\nUsername: ").await?;
            let user = read_line(stream).await?;
            send(stream, "Password: ").await?;
            let pass = read_line(stream).await?;
            user == USERNAME && pass == PASSWORD
        }
        DeviceFamily::Ruijie => {
            send(stream, "\r\nUser Access Verification\r\n\r\nPassword:").await?;
            let user = read_line(stream).await?;
            send(stream, "\r\nRJ-SW01>").await?;
            let enable = read_line(stream).await?;
            log.push(&format!("enable:{enable}"));
            send(stream, "\r\nPassword:").await?;
            let pass = read_line(stream).await?;
            user == USERNAME && pass == PASSWORD
        }
    };
    if !credentials_ok {
        send(stream, "\r\n% Authentication failed\r\n").await?;
        return None;
    }
    send(stream, &format!("\r\n{}", script.prompt)).await
}

/// Runs a fake device on `stream` until the client leaves.
///
/// `connection` is the 1-based index of this connection for the script.
pub async fn serve(script: DeviceScript, mut stream: DuplexStream, log: DeviceLog, connection: usize) {
    if serve_login(&script, &mut stream, &log).await.is_none() {
        return;
    }
    while let Some(line) = read_line(&mut stream).await {
        log.push(&line);
        if line == "exit" && script.family.kind() == gponctl::device::DeviceKind::Switch {
            return;
        }
        if connection == 1 && script.drop_first_on.as_deref() == Some(line.as_str()) {
            return;
        }
        if script.hang_on.as_deref() == Some(line.as_str()) {
            continue;
        }
        if line.is_empty()
            && let Some(delay) = script.newline_delay
        {
            tokio::time::sleep(delay).await;
        }
        let pages = script.responses.get(&line).cloned().unwrap_or_default();
        let mut out = format!("{line}\r\n");
        let last = pages.len().saturating_sub(1);
        for (index, page) in pages.iter().enumerate() {
            if !page.is_empty() {
                out.push_str(&page.replace('\n', "\r\n"));
                out.push_str("\r\n");
            }
            if index < last {
                out.push_str(MORE);
                if send(&mut stream, &out).await.is_none() {
                    return;
                }
                match read_pager_key(&mut stream).await {
                    Some(b' ') => log.push("<pager>"),
                    _ => return,
                }
                out = "\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}        \u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}"
                    .to_string();
            }
        }
        out.push_str(&script.prompt);
        if send(&mut stream, &out).await.is_none() {
            return;
        }
        if connection == 1 && script.close_after.as_deref() == Some(line.as_str()) {
            return;
        }
    }
}

/// Starts a fake device and returns the client end of its stream.
pub fn spawn_device(script: DeviceScript) -> (DuplexStream, DeviceLog) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let log = DeviceLog::default();
    tokio::spawn(serve(script, server, log.clone(), 1));
    (client, log)
}

/// Connector that answers every host with the same scripted device.
#[derive(Clone)]
pub struct FakeConnector {
    script: DeviceScript,
    pub log: DeviceLog,
    connections: Arc<AtomicUsize>,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new(script: DeviceScript) -> Self {
        Self {
            script,
            log: DeviceLog::default(),
            connections: Arc::new(AtomicUsize::new(0)),
            refuse: false,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        host: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<DuplexStream, ConnectError> {
        if self.refuse {
            return Err(ConnectError::ConnectionFailed {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let connection = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(
            self.script.clone(),
            server,
            self.log.clone(),
            connection,
        ));
        Ok(client)
    }
}

pub fn credentials() -> gponctl::session::Credentials {
    gponctl::session::Credentials::new(USERNAME, PASSWORD)
}

pub fn profile() -> Arc<gponctl::templates::DialectProfile> {
    Arc::new(gponctl::templates::DialectProfile::builtin().expect("builtin dialects"))
}

/// Logs in to a fresh fake device.
pub async fn open_session(
    script: DeviceScript,
    options: gponctl::config::SessionOptions,
) -> Result<(gponctl::session::DeviceSession, DeviceLog), ConnectError> {
    let family = script.family;
    let (stream, log) = spawn_device(script);
    let session = gponctl::session::DeviceSession::with_stream(
        stream,
        "10.0.0.1",
        &credentials(),
        family,
        profile(),
        options,
        gponctl::session::SessionRecorder::new(gponctl::session::SessionRecordLevel::Full),
    )
    .await?;
    Ok((session, log))
}
