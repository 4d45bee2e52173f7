use super::*;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Telnet command and option codes (RFC 854/857/858).
pub mod iac {
    pub const SE: u8 = 240;
    pub const SB: u8 = 250;
    pub const WILL: u8 = 251;
    pub const WONT: u8 = 252;
    pub const DO: u8 = 253;
    pub const DONT: u8 = 254;
    pub const IAC: u8 = 255;

    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DecodeState {
    #[default]
    Data,
    /// Previous byte was a data CR.
    Cr,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Bytes produced by feeding one chunk to the decoder.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Application data with Telnet commands removed.
    pub data: Vec<u8>,
    /// Negotiation answers to write back to the peer.
    pub replies: Vec<u8>,
}

/// Stateful Telnet stream decoder.
///
/// Commands may straddle chunk boundaries, so the state carries over between
/// calls to [`TelnetDecoder::feed`]. The device may echo and suppress go-ahead;
/// everything else is refused. Each option is answered at most once so that a
/// peer repeating itself cannot start a negotiation loop.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: DecodeState,
    answered: HashSet<(u8, u8)>,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for &byte in input {
            self.state = match self.state {
                DecodeState::Data => self.data_byte(byte, &mut out),
                DecodeState::Cr if byte == 0 => DecodeState::Data,
                DecodeState::Cr => self.data_byte(byte, &mut out),
                DecodeState::Iac => match byte {
                    iac::IAC => {
                        out.data.push(iac::IAC);
                        DecodeState::Data
                    }
                    iac::WILL | iac::WONT | iac::DO | iac::DONT => DecodeState::Negotiate(byte),
                    iac::SB => DecodeState::Subnegotiation,
                    _ => DecodeState::Data,
                },
                DecodeState::Negotiate(command) => {
                    self.answer(command, byte, &mut out.replies);
                    DecodeState::Data
                }
                DecodeState::Subnegotiation if byte == iac::IAC => DecodeState::SubnegotiationIac,
                DecodeState::Subnegotiation => DecodeState::Subnegotiation,
                DecodeState::SubnegotiationIac if byte == iac::SE => DecodeState::Data,
                DecodeState::SubnegotiationIac => DecodeState::Subnegotiation,
            };
        }
        out
    }

    fn data_byte(&mut self, byte: u8, out: &mut Decoded) -> DecodeState {
        match byte {
            iac::IAC => DecodeState::Iac,
            b'\r' => {
                out.data.push(byte);
                DecodeState::Cr
            }
            _ => {
                out.data.push(byte);
                DecodeState::Data
            }
        }
    }

    fn answer(&mut self, command: u8, option: u8, replies: &mut Vec<u8>) {
        let reply = match command {
            iac::WILL if option == iac::ECHO || option == iac::SGA => iac::DO,
            iac::WILL => iac::DONT,
            iac::DO => iac::WONT,
            _ => return,
        };
        if self.answered.insert((command, option)) {
            replies.extend_from_slice(&[iac::IAC, reply, option]);
        }
    }
}

/// Line-oriented Telnet transport.
///
/// A background I/O task owns the socket: it decodes Telnet framing, answers
/// negotiation, forwards text to the session and writes outgoing bytes. The
/// transport itself only sees plain text.
pub struct LineTransport {
    peer: String,
    outbound: UnboundedSender<Vec<u8>>,
    inbound: UnboundedReceiver<String>,
    pagination: Vec<String>,
    closed: Arc<AtomicBool>,
    io_task: JoinHandle<()>,
}

impl LineTransport {
    /// Opens a TCP connection to `host:port` and starts the I/O task.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        pagination: Vec<String>,
    ) -> Result<Self, ConnectError> {
        let stream = tcp_connect(host, port, connect_timeout).await?;
        Ok(Self::spawn(stream, host, pagination))
    }

    /// Wraps an already connected stream.
    pub fn spawn<S>(stream: S, peer: impl Into<String>, pagination: Vec<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();
        let closed = Arc::new(AtomicBool::new(false));

        let io_task = tokio::spawn(pump(
            stream,
            peer.clone(),
            outbound_rx,
            inbound_tx,
            closed.clone(),
        ));

        let mut pagination = pagination;
        // Longer markers first: "---- More ----" contains "-- More --".
        pagination.sort_by_key(|m| std::cmp::Reverse(m.len()));

        Self {
            peer,
            outbound,
            inbound,
            pagination,
            closed,
            io_task,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Shared flag set by the I/O task once the stream is gone.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Sends text as is.
    pub fn write_raw(&self, text: &str) -> Result<(), ConnectError> {
        trace!("{} > {:?}", self.peer, text);
        self.outbound
            .send(text.as_bytes().to_vec())
            .map_err(|_| ConnectError::ConnectionFailed {
                host: self.peer.clone(),
                reason: "write on closed stream".to_string(),
            })
    }

    /// Sends text followed by a line terminator.
    pub fn write_line(&self, text: &str) -> Result<(), ConnectError> {
        self.write_raw(&format!("{text}\n"))
    }

    /// Drops text that arrived while nobody was reading.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(chunk) = self.inbound.try_recv() {
            trace!("{} discarding stale {:?}", self.peer, chunk);
            dropped += chunk.len();
        }
        dropped
    }

    /// Reads until `matcher` accepts the accumulated text.
    ///
    /// Pager markers are answered with a keystroke and removed from the text
    /// before the matcher sees it.
    pub async fn read_until<F>(&mut self, matcher: F, timeout: Duration) -> Result<String, ConnectError>
    where
        F: Fn(&str) -> bool,
    {
        let mut data = String::new();

        let result = tokio::time::timeout(timeout, async {
            loop {
                let Some(chunk) = self.inbound.recv().await else {
                    return Err(());
                };
                trace!("{} < {:?}", self.peer, chunk);
                data.push_str(&chunk);

                let pages = strip_pagination(&mut data, &self.pagination);
                if pages > 0 {
                    for _ in 0..pages {
                        self.write_raw(config::PAGER_CONTINUE).map_err(|_| ())?;
                    }
                    // The pager is waiting for us, no prompt can be pending.
                    continue;
                }

                if matcher(&data) {
                    return Ok(());
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(data),
            Ok(Err(())) => {
                debug!("{} stream closed while reading", self.peer);
                Err(ConnectError::ConnectionClosed(data))
            }
            Err(_) => {
                warn!("{} timed out waiting for device output", self.peer);
                Err(ConnectError::Timeout {
                    secs: timeout.as_secs(),
                    partial: data,
                })
            }
        }
    }

    /// Stops the I/O task, closing the socket.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.io_task.abort();
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

/// Connects to the Telnet port of `host` within `connect_timeout`.
pub async fn tcp_connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, ConnectError> {
    let addr = format!("{host}:{port}");
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(ConnectError::ConnectionFailed {
                host: host.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(ConnectError::ConnectionFailed {
                host: host.to_string(),
                reason: format!("connect timed out after {}s", connect_timeout.as_secs()),
            });
        }
    };
    let _ = stream.set_nodelay(true);
    debug!("{} TCP connection successful", addr);
    Ok(stream)
}

/// Removes every pager marker from `data`, returning how many were found.
pub fn strip_pagination(data: &mut String, markers: &[String]) -> usize {
    let mut found = 0;
    for marker in markers {
        let count = data.matches(marker.as_str()).count();
        if count > 0 {
            *data = data.replace(marker.as_str(), "");
            found += count;
        }
    }
    found
}

async fn pump<S>(
    stream: S,
    peer: String,
    mut outbound: UnboundedReceiver<Vec<u8>>,
    inbound: UnboundedSender<String>,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = TelnetDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            data = outbound.recv() => {
                let Some(bytes) = data else {
                    debug!("{} transport dropped, stopping I/O task", peer);
                    break;
                };
                if let Err(e) = write_flush(&mut writer, &escape_iac(&bytes)).await {
                    debug!("{} failed to write: {:?}", peer, e);
                    break;
                }
            }
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!("{} sent EOF", peer);
                        break;
                    }
                    Ok(n) => {
                        let decoded = decoder.feed(&buf[..n]);
                        if !decoded.replies.is_empty()
                            && let Err(e) = write_flush(&mut writer, &decoded.replies).await
                        {
                            debug!("{} failed to answer negotiation: {:?}", peer, e);
                            break;
                        }
                        if !decoded.data.is_empty() {
                            let text = String::from_utf8_lossy(&decoded.data).into_owned();
                            if inbound.send(text).is_err() {
                                debug!("{} output receiver dropped", peer);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("{} read error: {:?}", peer, e);
                        break;
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
    let _ = writer.shutdown().await;
    debug!("{} Telnet I/O task ended", peer);
}

async fn write_flush<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Doubles any 0xFF data byte as Telnet requires.
fn escape_iac(bytes: &[u8]) -> Vec<u8> {
    if !bytes.contains(&iac::IAC) {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len() + 4);
    for &b in bytes {
        out.push(b);
        if b == iac::IAC {
            out.push(iac::IAC);
        }
    }
    out
}
