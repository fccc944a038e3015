use std::io;

use async_trait::async_trait;
use gnss_relay_core::endpoint::TcpClientAddress;
use gnss_relay_core::StreamKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::Transport;
use crate::error::{TransportError, TransportResult};

/// Outgoing raw TCP connection.
#[derive(Debug)]
pub struct TcpClientTransport {
    address: TcpClientAddress,
    stream: Option<TcpStream>,
}

impl TcpClientTransport {
    pub fn new(address: TcpClientAddress) -> Self {
        Self {
            address,
            stream: None,
        }
    }
}

/// Non-blocking read from a connected socket.
///
/// `Ok(0)` means nothing is available; an orderly shutdown by the peer is
/// reported as [`TransportError::ConnectionClosed`].
pub(crate) fn try_read(stream: &TcpStream, buf: &mut [u8]) -> TransportResult<usize> {
    match stream.try_read(buf) {
        Ok(0) if !buf.is_empty() => Err(TransportError::ConnectionClosed),
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::TcpClient
    }

    fn describe(&self) -> String {
        format!("tcpcli://{}:{}", self.address.host, self.address.port)
    }

    async fn open(&mut self) -> TransportResult<()> {
        let stream = TcpStream::connect((self.address.host.as_str(), self.address.port)).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{}", self.address.host, self.address.port);
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

    #[tokio::test]
    async fn test_exchange_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpClientTransport::new(TcpClientAddress {
            host: "127.0.0.1".to_string(),
            port,
        });

        transport.open().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        assert_eq!(transport.write(b"hello").await.unwrap(), 5);
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        peer.write_all(b"data").await.unwrap();
        let mut got = Vec::new();
        let mut chunk = [0u8; 16];
        while got.len() < 4 {
            let n = transport.read(&mut chunk).await.unwrap();
            got.extend_from_slice(&chunk[..n]);
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(got, b"data");

        drop(peer);
        let closed = loop {
            match transport.read(&mut chunk).await {
                Ok(0) => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(closed, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut transport = TcpClientTransport::new(TcpClientAddress {
            host: "127.0.0.1".to_string(),
            port,
        });
        assert!(transport.open().await.is_err());
        assert!(matches!(transport.read(&mut [0u8; 4]).await, Err(TransportError::NotOpen)));
    }
}
