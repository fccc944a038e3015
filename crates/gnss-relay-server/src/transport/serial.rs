use std::io::{self, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use gnss_relay_core::endpoint::{FlowControl, Parity, SerialAddress};
use gnss_relay_core::StreamKind;
use serialport::SerialPort;
use tracing::debug;

use super::Transport;
use crate::error::{TransportError, TransportResult};

/// Blocking read timeout of the port; keeps each read short.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial port transport.
///
/// `serialport` is blocking, so every call runs on the blocking pool. The
/// port is moved into the blocking task and handed back when it finishes.
pub struct SerialTransport {
    address: SerialAddress,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(address: SerialAddress) -> Self {
        Self {
            address,
            port: None,
        }
    }

    /// Device path; bare names are looked up under `/dev` on Unix.
    pub fn device_path(&self) -> String {
        let port = &self.address.port;
        if cfg!(unix) && !port.starts_with('/') {
            format!("/dev/{}", port)
        } else {
            port.clone()
        }
    }

    fn builder(&self) -> serialport::SerialPortBuilder {
        let a = &self.address;
        let data_bits = match a.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let parity = match a.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        };
        let stop_bits = match a.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let flow_control = match a.flow_control {
            FlowControl::Off => serialport::FlowControl::None,
            FlowControl::Rts => serialport::FlowControl::Hardware,
            FlowControl::Xon => serialport::FlowControl::Software,
        };
        serialport::new(self.device_path(), a.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(READ_TIMEOUT)
    }
}

fn join_error(e: tokio::task::JoinError) -> TransportError {
    TransportError::Io(io::Error::new(io::ErrorKind::Other, e))
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::Serial
    }

    fn describe(&self) -> String {
        format!("serial://{}:{}", self.address.port, self.address.baud_rate)
    }

    async fn open(&mut self) -> TransportResult<()> {
        let builder = self.builder();
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(join_error)??;
        debug!("Opened serial port {}", self.device_path());
        self.port = Some(port);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut port = self.port.take().ok_or(TransportError::NotOpen)?;
        let len = buf.len();
        let (port, result, data) = tokio::task::spawn_blocking(move || {
            let mut data = vec![0u8; len];
            let result = port.read(&mut data);
            (port, result, data)
        })
        .await
        .map_err(join_error)?;
        self.port = Some(port);

        match result {
            Ok(n) => {
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let mut port = self.port.take().ok_or(TransportError::NotOpen)?;
        let owned = data.to_vec();
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&owned).and_then(|()| port.flush());
            (port, result)
        })
        .await
        .map_err(join_error)?;
        self.port = Some(port);
        result?;
        Ok(data.len())
    }

    async fn close(&mut self) {
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(port: &str) -> SerialAddress {
        SerialAddress {
            port: port.to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::Off,
        }
    }

    #[test]
    fn test_device_path() {
        if cfg!(unix) {
            assert_eq!(SerialTransport::new(address("ttyUSB0")).device_path(), "/dev/ttyUSB0");
        }
        assert_eq!(
            SerialTransport::new(address("/dev/ttyACM1")).device_path(),
            "/dev/ttyACM1"
        );
    }

    #[tokio::test]
    async fn test_missing_port_fails_to_open() {
        let mut transport = SerialTransport::new(address("/dev/gnss-relay-no-such-port"));
        assert!(transport.open().await.is_err());
        assert!(matches!(
            transport.read(&mut [0u8; 8]).await,
            Err(TransportError::NotOpen)
        ));
    }
}
