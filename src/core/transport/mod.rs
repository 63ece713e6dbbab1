//! Transport layer for the unit's two UARTs
//!
//! - the signal channel carries AT commands and line reports
//! - the data channel carries raw payload once `AT+KDNP` connected it
//!
//! The engine only needs `AsyncRead`/`AsyncWrite`; this module opens the
//! real serial devices with `tokio-serial`.

mod serial;

pub use serial::{
    list_ports, PortInfo, SerialConfig, SerialFlowControl, SerialParity, DEFAULT_BAUD_RATE,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::error::Result;

/// Bidirectional byte stream used for the data channel
pub trait DataChannel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DataChannel for T {}

/// Opens a fresh data channel for each request
#[async_trait]
pub trait DataChannelOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DataChannel>>;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}

/// Data UART, always with RTS/CTS flow control
#[derive(Debug, Clone)]
pub struct SerialDataChannel {
    config: SerialConfig,
}

impl SerialDataChannel {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config: config.flow_control(SerialFlowControl::Hardware),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

#[async_trait]
impl DataChannelOpener for SerialDataChannel {
    async fn open(&self) -> Result<Box<dyn DataChannel>> {
        let stream = self.config.open_clean()?;
        debug!("Data channel open on {}", self.config.port);
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        self.config.connection_info()
    }
}
