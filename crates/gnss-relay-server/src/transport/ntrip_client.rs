use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BytesMut};
use gnss_relay_core::endpoint::NtripClientAddress;
use gnss_relay_core::StreamKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::tcp_client::try_read;
use super::{Transport, AGENT};
use crate::error::{TransportError, TransportResult};

/// Largest response head accepted during a handshake.
const MAX_HEAD_LEN: usize = 4096;

/// Caster reply to a client or server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// `ICY 200 OK` (NTRIP 1) or `HTTP/1.x 200` (NTRIP 2).
    Ok,
    /// `SOURCETABLE 200 OK`.
    SourceTable,
    /// Anything else; holds the status line.
    Rejected(String),
}

/// Read a caster reply head.
///
/// Returns the classified reply and the bytes received after the head,
/// which already belong to the data stream.
pub(crate) async fn read_reply(
    stream: &mut TcpStream,
    timeout: Duration,
) -> TransportResult<(Reply, BytesMut)> {
    let mut buf = BytesMut::with_capacity(1024);
    let result = tokio::time::timeout(timeout, async {
        loop {
            if let Some(reply) = parse_reply(&mut buf) {
                return Ok::<_, TransportError>(reply);
            }
            if buf.len() >= MAX_HEAD_LEN {
                return Err(TransportError::Handshake("response head too long".to_string()));
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(TransportError::ConnectionClosed);
            }
        }
    })
    .await
    .map_err(|_| TransportError::Timeout(timeout))??;
    Ok((result, buf))
}

/// Classify and strip a complete head from `buf`, if one is buffered.
fn parse_reply(buf: &mut BytesMut) -> Option<Reply> {
    let line_end = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&buf[..line_end]).trim().to_string();

    if line.starts_with("ICY 200") {
        buf.advance(line_end + 2);
        return Some(Reply::Ok);
    }
    if line.starts_with("SOURCETABLE 200") {
        buf.advance(line_end + 2);
        return Some(Reply::SourceTable);
    }
    if line.starts_with("HTTP/") {
        // NTRIP 2 style: the head ends with an empty line.
        let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
        buf.advance(head_end + 4);
        let ok = line.split_whitespace().nth(1) == Some("200");
        return Some(if ok { Reply::Ok } else { Reply::Rejected(line) });
    }
    buf.advance(line_end + 2);
    Some(Reply::Rejected(line))
}

/// NTRIP client: pulls a mount point from a caster.
///
/// With an empty mount point the caster source table is requested and
/// relayed as data.
#[derive(Debug)]
pub struct NtripClientTransport {
    address: NtripClientAddress,
    proxy: Option<String>,
    timeout: Duration,
    stream: Option<TcpStream>,
    pending: BytesMut,
}

impl NtripClientTransport {
    pub fn new(address: NtripClientAddress, proxy: Option<String>, timeout: Duration) -> Self {
        Self {
            address,
            proxy,
            timeout,
            stream: None,
            pending: BytesMut::new(),
        }
    }

    /// The HTTP request sent after connecting.
    pub fn request(&self) -> String {
        let a = &self.address;
        let target = match &self.proxy {
            Some(_) => format!("http://{}:{}/{}", a.host, a.port, a.mountpoint),
            None => format!("/{}", a.mountpoint),
        };
        let mut request = format!("GET {} HTTP/1.0\r\nUser-Agent: {}\r\n", target, AGENT);
        if let Some(user) = &a.user {
            let credentials = format!("{}:{}", user, a.password.as_deref().unwrap_or(""));
            request.push_str(&format!("Authorization: Basic {}\r\n", BASE64.encode(credentials)));
        }
        request.push_str("\r\n");
        request
    }

    fn connect_target(&self) -> String {
        match &self.proxy {
            Some(proxy) => proxy.clone(),
            None => format!("{}:{}", self.address.host, self.address.port),
        }
    }
}

#[async_trait]
impl Transport for NtripClientTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::NtripClient
    }

    fn describe(&self) -> String {
        format!(
            "ntrip://{}:{}/{}",
            self.address.host, self.address.port, self.address.mountpoint
        )
    }

    async fn open(&mut self) -> TransportResult<()> {
        let mut stream = TcpStream::connect(self.connect_target()).await?;
        stream.set_nodelay(true)?;
        stream.write_all(self.request().as_bytes()).await?;
        debug!("NTRIP request sent to {}", self.describe());

        let (reply, rest) = read_reply(&mut stream, self.timeout).await?;
        match reply {
            Reply::Ok => {}
            Reply::SourceTable if self.address.mountpoint.is_empty() => {
                info!("Receiving source table from {}", self.address.host);
            }
            Reply::SourceTable => {
                return Err(TransportError::Handshake(format!(
                    "mount point {} not found",
                    self.address.mountpoint
                )));
            }
            Reply::Rejected(line) => return Err(TransportError::Handshake(line)),
        }
        self.pending = rest;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotOpen)?;
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        try_read(stream, buf)
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) {
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
