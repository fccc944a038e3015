use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use gnss_relay_core::endpoint::TcpServerAddress;
use gnss_relay_core::StreamKind;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::tcp_client::try_read;
use super::Transport;
use crate::error::{TransportError, TransportResult};

/// Bytes a peer may fall behind before it is dropped.
pub const PEER_BACKLOG: usize = 1 << 20;

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    stream: TcpStream,
    /// Data accepted for this peer but not yet taken by its socket.
    pending: BytesMut,
}

impl Peer {
    /// Hand pending data to the socket without waiting.
    fn flush(&mut self) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.stream.try_write(&self.pending) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Listening TCP socket serving any number of peers.
///
/// Peers are accepted by a background task. Reads gather data from every
/// peer, writes go to every peer; a peer that fails is dropped without
/// affecting the others. With no peer connected the stream is waiting.
///
/// Writes never wait on a socket. Each peer keeps its own backlog and a
/// peer more than [`PEER_BACKLOG`] bytes behind is disconnected.
#[derive(Debug)]
pub struct TcpServerTransport {
    address: TcpServerAddress,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    incoming: Option<mpsc::Receiver<(TcpStream, SocketAddr)>>,
    peers: Vec<Peer>,
}

impl TcpServerTransport {
    pub fn new(address: TcpServerAddress) -> Self {
        Self {
            address,
            local_addr: None,
            accept_task: None,
            incoming: None,
            peers: Vec::new(),
        }
    }

    /// Bound address, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Bytes queued for peers and not yet sent.
    pub fn backlog(&self) -> usize {
        self.peers.iter().map(|p| p.pending.len()).sum()
    }

    fn accept_pending(&mut self) {
        let Some(incoming) = self.incoming.as_mut() else {
            return;
        };
        while let Ok((stream, addr)) = incoming.try_recv() {
            info!("Client connected to port {}: {}", self.address.port, addr);
            self.peers.push(Peer {
                addr,
                stream,
                pending: BytesMut::new(),
            });
        }
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<(TcpStream, SocketAddr)>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                if tx.send((stream, addr)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[async_trait]
impl Transport for TcpServerTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::TcpServer
    }

    fn describe(&self) -> String {
        format!(
            "tcpsvr://{}:{}",
            self.address.bind.as_deref().unwrap_or(""),
            self.address.port
        )
    }

    async fn open(&mut self) -> TransportResult<()> {
        let host = self.address.bind.as_deref().unwrap_or("0.0.0.0");
        let listener = TcpListener::bind((host, self.address.port)).await?;
        let local_addr = listener.local_addr()?;
        debug!("Listening on {}", local_addr);

        let (tx, rx) = mpsc::channel(16);
        self.accept_task = Some(tokio::spawn(accept_loop(listener, tx)));
        self.incoming = Some(rx);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        if self.incoming.is_none() {
            return Err(TransportError::NotOpen);
        }
        self.accept_pending();

        let mut filled = 0;
        let mut i = 0;
        while i < self.peers.len() && filled < buf.len() {
            match try_read(&self.peers[i].stream, &mut buf[filled..]) {
                Ok(n) => {
                    filled += n;
                    i += 1;
                }
                Err(e) => {
                    let peer = self.peers.remove(i);
                    info!("Client disconnected from port {}: {} ({})", self.address.port, peer.addr, e);
                }
            }
        }
        Ok(filled)
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        if self.incoming.is_none() {
            return Err(TransportError::NotOpen);
        }
        self.accept_pending();

        let port = self.address.port;
        self.peers.retain_mut(|peer| {
            if peer.pending.len() + data.len() > PEER_BACKLOG {
                warn!("Client on port {} too slow, dropped: {}", port, peer.addr);
                return false;
            }
            peer.pending.extend_from_slice(data);
            match peer.flush() {
                Ok(()) => true,
                Err(e) => {
                    info!("Client disconnected from port {}: {} ({})", port, peer.addr, e);
                    false
                }
            }
        });
        Ok(if self.peers.is_empty() { 0 } else { data.len() })
    }

    async fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.incoming = None;
        self.local_addr = None;
        for mut peer in self.peers.drain(..) {
            let _ = peer.flush();
            let _ = peer.stream.shutdown().await;
        }
    }

    fn is_waiting(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Drop for TcpServerTransport {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}
