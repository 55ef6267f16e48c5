//! RS-232 session for `ASRL` resources.
//!
//! The 34401A serial port runs at 9600 baud, 8 data bits, no parity, 2 stop bits,
//! with LF-terminated commands and responses. Remote mode has to be requested
//! explicitly (`SYST:REM`) before the meter accepts configuration commands.

use crate::error::{SessionError, SessionErrorKind};
use crate::instrument::{InstrumentSession, ResourceAddress};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Serial session protected by a mutex for exclusive command/response pairs.
pub struct SerialSession {
    address: String,
    port: Mutex<BufReader<SerialStream>>,
    timeout: Duration,
}

impl SerialSession {
    /// Open the port and put the meter into remote mode.
    pub async fn open(address: &ResourceAddress, timeout: Duration) -> Result<Self, SessionError> {
        let port_name = address.serial_port().ok_or_else(|| {
            SessionError::new(
                address.as_str(),
                SessionErrorKind::Open,
                "not a serial resource",
            )
        })?;

        let port = tokio_serial::new(&port_name, 9600)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::Two)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                SessionError::new(
                    address.as_str(),
                    SessionErrorKind::Open,
                    format!("failed to open {}: {}", port_name, e),
                )
            })?;

        let session = Self {
            address: address.as_str().to_string(),
            port: Mutex::new(BufReader::new(port)),
            timeout,
        };
        session.write("SYST:REM").await?;
        Ok(session)
    }

    fn comm_error(&self, message: String) -> SessionError {
        SessionError::new(self.address.as_str(), SessionErrorKind::Communication, message)
    }
}

#[async_trait]
impl InstrumentSession for SerialSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, command: &str) -> Result<(), SessionError> {
        let mut port = self.port.lock().await;
        debug!(address = %self.address, command, "serial write");
        port.get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| self.comm_error(format!("write failed: {}", e)))?;
        port.get_mut()
            .flush()
            .await
            .map_err(|e| self.comm_error(format!("flush failed: {}", e)))
    }

    async fn query(&self, command: &str) -> Result<String, SessionError> {
        let mut port = self.port.lock().await;
        debug!(address = %self.address, command, "serial query");
        port.get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| self.comm_error(format!("write failed: {}", e)))?;

        let mut response = String::new();
        match tokio::time::timeout(self.timeout, port.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(self.comm_error("port closed".to_string())),
            Ok(Ok(_)) => Ok(response.trim_end().to_string()),
            Ok(Err(e)) => Err(self.comm_error(format!("read failed: {}", e))),
            Err(_) => Err(SessionError::new(
                self.address.as_str(),
                SessionErrorKind::Timeout,
                format!("'{}' timed out", command),
            )),
        }
    }
}
