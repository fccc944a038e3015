//! Stream transports.
//!
//! Every endpoint kind is realized by one [`Transport`] implementation:
//!
//! - [`FileTransport`]: log files with time keywords, swap and time tags
//! - [`SerialTransport`]: serial ports through `serialport`
//! - [`TcpClientTransport`] / [`TcpServerTransport`]: raw TCP
//! - [`NtripClientTransport`] / [`NtripServerTransport`]: NTRIP over TCP
//! - [`MemoryTransport`]: in-process source or sink for tests and embedders
//!
//! The engine only sees the trait, so a new kind needs no engine change.

use async_trait::async_trait;
use gnss_relay_core::{Address, Endpoint, RelayOptions, StreamKind, StreamRole};

use crate::error::TransportResult;

mod file;
mod memory;
mod ntrip_client;
mod ntrip_server;
mod serial;
mod tcp_client;
mod tcp_server;

pub use file::FileTransport;
pub use memory::{MemoryHandle, MemoryTransport};
pub use ntrip_client::NtripClientTransport;
pub use ntrip_server::NtripServerTransport;
pub use serial::SerialTransport;
pub use tcp_client::TcpClientTransport;
pub use tcp_server::TcpServerTransport;

/// Agent string sent in NTRIP handshakes.
pub const AGENT: &str = concat!("NTRIP gnss-relay/", env!("CARGO_PKG_VERSION"));

/// Uniform connection over one endpoint.
///
/// `read` and `write` are only called between a successful `open` and the
/// next `close`. Any error puts the stream into the error state; the engine
/// then closes the transport and opens it again later.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> StreamKind;

    /// Human readable target, used in log lines.
    fn describe(&self) -> String;

    /// Establish the connection. May be called again after `close`.
    async fn open(&mut self) -> TransportResult<()>;

    /// Read whatever is available now. `Ok(0)` means no data yet.
    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Write all of `data`. Returns the number of bytes delivered, which is
    /// 0 when the transport has nobody to deliver to.
    async fn write(&mut self, data: &[u8]) -> TransportResult<usize>;

    /// Release all resources.
    async fn close(&mut self);

    /// Open but still waiting for a peer.
    fn is_waiting(&self) -> bool {
        false
    }

    /// Whether receiver command text may be sent through this transport.
    fn accepts_commands(&self) -> bool {
        self.kind().accepts_commands()
    }
}

/// Build the transport for a configured endpoint.
pub fn from_endpoint(
    endpoint: &Endpoint,
    role: StreamRole,
    options: &RelayOptions,
) -> Box<dyn Transport> {
    match &endpoint.address {
        Address::File(address) => Box::new(FileTransport::new(address.clone(), role, options)),
        Address::Serial(address) => Box::new(SerialTransport::new(address.clone())),
        Address::TcpServer(address) => Box::new(TcpServerTransport::new(address.clone())),
        Address::TcpClient(address) => Box::new(TcpClientTransport::new(address.clone())),
        Address::NtripClient(address) => Box::new(NtripClientTransport::new(
            address.clone(),
            options.proxy.clone(),
            options.timeout,
        )),
        Address::NtripServer(address) => {
            Box::new(NtripServerTransport::new(address.clone(), options.timeout))
        }
    }
}
