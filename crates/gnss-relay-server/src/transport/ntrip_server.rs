use std::time::Duration;

use async_trait::async_trait;
use gnss_relay_core::endpoint::NtripServerAddress;
use gnss_relay_core::StreamKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::ntrip_client::{read_reply, Reply};
use super::tcp_client::try_read;
use super::{Transport, AGENT};
use crate::error::{TransportError, TransportResult};

/// NTRIP server: pushes data to a caster mount point.
#[derive(Debug)]
pub struct NtripServerTransport {
    address: NtripServerAddress,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl NtripServerTransport {
    pub fn new(address: NtripServerAddress, timeout: Duration) -> Self {
        Self {
            address,
            timeout,
            stream: None,
        }
    }

    /// The `SOURCE` request sent after connecting.
    pub fn request(&self) -> String {
        let a = &self.address;
        let mut request = format!(
            "SOURCE {} /{}\r\nSource-Agent: {}\r\n",
            a.password.as_deref().unwrap_or(""),
            a.mountpoint,
            AGENT
        );
        if let Some(entry) = &a.source_entry {
            request.push_str(&format!("STR: {}\r\n", entry));
        }
        request.push_str("\r\n");
        request
    }
}

#[async_trait]
impl Transport for NtripServerTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::NtripServer
    }

    fn describe(&self) -> String {
        format!(
            "ntrips://{}:{}/{}",
            self.address.host, self.address.port, self.address.mountpoint
        )
    }

    async fn open(&mut self) -> TransportResult<()> {
        let mut stream = TcpStream::connect((self.address.host.as_str(), self.address.port)).await?;
        stream.set_nodelay(true)?;
        stream.write_all(self.request().as_bytes()).await?;
        debug!("NTRIP SOURCE request sent to {}", self.describe());

        match read_reply(&mut stream, self.timeout).await?.0 {
            Reply::Ok => {}
            Reply::SourceTable => {
                return Err(TransportError::Handshake("unexpected source table".to_string()));
            }
            Reply::Rejected(line) => return Err(TransportError::Handshake(line)),
        }
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotOpen)?;
        try_read(stream, buf)
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn address(port: u16) -> NtripServerAddress {
        NtripServerAddress {
            password: Some("secret".to_string()),
            host: "127.0.0.1".to_string(),
            port,
            mountpoint: "BASE1".to_string(),
            source_entry: Some("BASE1;RTCM 3.3".to_string()),
        }
    }

    #[test]
    fn test_source_request() {
        let transport = NtripServerTransport::new(address(2101), Duration::from_secs(1));
        let request = transport.request();
        assert!(request.starts_with("SOURCE secret /BASE1\r\nSource-Agent: NTRIP gnss-relay/"));
        assert!(request.contains("STR: BASE1;RTCM 3.3\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_upload_after_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let caster = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                let mut byte = [0u8; 1];
                socket.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            socket.write_all(b"ICY 200 OK\r\n").await.unwrap();
            let mut data = [0u8; 3];
            socket.read_exact(&mut data).await.unwrap();
            data
        });

        let mut transport = NtripServerTransport::new(address(port), Duration::from_secs(2));
        transport.open().await.unwrap();
        assert_eq!(transport.write(&[0xD3, 0x00, 0x00]).await.unwrap(), 3);
        assert_eq!(caster.await.unwrap(), [0xD3, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_bad_password() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"ERROR - Bad Password\r\n").await;
        });

        let mut transport = NtripServerTransport::new(address(port), Duration::from_secs(2));
        assert!(matches!(transport.open().await, Err(TransportError::Handshake(_))));
    }
}
