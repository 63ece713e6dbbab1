//! Device facade for an LU1CM01x unit
//!
//! A [`Modem`] owns the signal channel: one reader task turns the incoming
//! bytes into lines and hands them to the [`LineRouter`], while operations
//! register a transaction, write their command through the
//! [`WriteSerializer`] and await the answer.

mod certificates;
mod connection;
mod queries;

pub use connection::{
    build_http_request, HttpScheme, HttpTarget, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HTTP_TIMEOUT,
};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{error, info, trace, warn};

use super::error::Result;
use super::line::Line;
use super::location::{cap_timeout, LocationFixAggregator, PositionFix, DEFAULT_LOCATION_TIMEOUT};
use super::protocol::at;
use super::protocol::framing::CrLfLineCodec;
use super::router::{EchoConfig, LatestValueStore, LineRouter, ModemEvent};
use super::status::StatusControl;
use super::transaction::{Transaction, TransactionRegistry};
use super::transport::{DataChannelOpener, SerialConfig};
use super::writer::{WriteErrorPolicy, WriteSerializer, DEFAULT_SETTLE_DELAY};

/// Deadline for single-line query answers
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after the certificate preamble before writing key material
pub const DEFAULT_CERTIFICATE_WAIT: Duration = Duration::from_secs(2);

/// Timing and logging knobs of a [`Modem`]
#[derive(Debug, Clone)]
pub struct ModemOptions {
    pub settle_delay: Duration,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub http_timeout: Duration,
    pub certificate_wait: Duration,
    pub echo: EchoConfig,
    pub write_policy: WriteErrorPolicy,
}

impl Default for ModemOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            certificate_wait: DEFAULT_CERTIFICATE_WAIT,
            echo: EchoConfig::default(),
            write_policy: WriteErrorPolicy::default(),
        }
    }
}

/// Host side of one unit
pub struct Modem {
    router: LineRouter,
    registry: TransactionRegistry,
    writer: WriteSerializer,
    status: Option<Arc<dyn StatusControl>>,
    data: Option<Arc<dyn DataChannelOpener>>,
    /// Set while a data session or certificate update owns the unit
    data_busy: Arc<AtomicBool>,
    options: ModemOptions,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Modem {
    /// Attach to an already open signal channel
    ///
    /// Spawns the reader task, so this must run inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, options: ModemOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let registry = TransactionRegistry::new();
        let router = LineRouter::new(registry.clone(), options.echo);
        let writer = WriteSerializer::new(writer)
            .settle_delay(options.settle_delay)
            .policy(options.write_policy.clone());

        let reader = tokio::spawn(read_loop(reader, router.clone()));

        Self {
            router,
            registry,
            writer,
            status: None,
            data: None,
            data_busy: Arc::new(AtomicBool::new(false)),
            options,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Open the signal UART and attach to it
    pub fn open(signal: &SerialConfig, options: ModemOptions) -> Result<Self> {
        let stream = signal.open_clean()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self::new(reader, writer, options))
    }

    /// Use a status collaborator for connection state and data enable
    #[must_use]
    pub fn with_status(mut self, status: Arc<dyn StatusControl>) -> Self {
        self.status = Some(status);
        self
    }

    /// Use a data channel for HTTP requests
    #[must_use]
    pub fn with_data_channel(mut self, opener: Arc<dyn DataChannelOpener>) -> Self {
        self.data = Some(opener);
        self
    }

    /// Send the echo/quiet/verbose setup the driver relies on
    pub async fn initialize(&self) -> Result<()> {
        for command in at::INIT_SEQUENCE {
            self.writer.write(command).await?;
        }
        info!("Signal channel initialized");
        Ok(())
    }

    /// Stop the reader task and shut the signal channel down
    pub async fn close(&self) -> Result<()> {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.writer.shutdown().await?;
        info!("Signal channel closed");
        Ok(())
    }

    /// Connection events and lines nobody asked for
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.router.subscribe()
    }

    /// Latest value per report key
    pub fn snapshot(&self) -> LatestValueStore {
        self.router.snapshot()
    }

    /// Number of transactions still waiting for an answer
    pub fn pending_transactions(&self) -> usize {
        self.registry.len()
    }

    /// Is the reader task still running?
    pub fn is_listening(&self) -> bool {
        self.reader
            .lock()
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }

    pub fn status(&self) -> Option<&Arc<dyn StatusControl>> {
        self.status.as_ref()
    }

    pub fn options(&self) -> &ModemOptions {
        &self.options
    }

    /// Write a command without waiting for any answer
    pub async fn send(&self, command: &str) -> Result<()> {
        self.writer.write(command).await
    }

    /// Register `matcher`, then write `command`, then wait for the answer
    pub async fn query<T, F>(&self, command: &str, timeout: Duration, matcher: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut(&Line) -> Option<Result<T>> + Send + 'static,
    {
        let transaction = self.registry.register_fn(timeout, matcher);
        self.send_then_wait(command, transaction).await
    }

    async fn send_then_wait<T: Send + 'static>(
        &self,
        command: &str,
        transaction: Transaction<T>,
    ) -> Result<T> {
        // A failed write drops the transaction, which unregisters it
        self.writer.write(command).await?;
        transaction.await
    }

    /// Run positioning until a fix within `min_accuracy` meters
    ///
    /// `timeout` is capped at ten minutes. When it passes after a position
    /// was seen, the partial fix is returned with `success == false`.
    /// Positioning is always stopped again before returning.
    pub async fn get_location(&self, min_accuracy: f64, timeout: Option<Duration>) -> Result<PositionFix> {
        let timeout = cap_timeout(timeout.unwrap_or(DEFAULT_LOCATION_TIMEOUT));
        let transaction = self
            .registry
            .register(LocationFixAggregator::new(min_accuracy), timeout);

        let result = match self.writer.write(at::CMD_POSITIONING_START).await {
            Ok(()) => transaction.await,
            Err(e) => {
                drop(transaction);
                Err(e)
            }
        };
        let stopped = self.writer.write(at::CMD_POSITIONING_STOP).await;

        let fix = result?;
        stopped?;
        Ok(fix)
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Feed every received line to the router until the stream ends
async fn read_loop<R>(reader: R, router: LineRouter)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = FramedRead::new(reader, CrLfLineCodec::new());
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => {
                trace!("> {}", line);
                router.on_line(&line);
            }
            Err(e) => {
                error!("Signal channel read failed: {}", e);
                break;
            }
        }
    }
    warn!("Signal port closing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ModemError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn quick() -> ModemOptions {
        ModemOptions {
            settle_delay: Duration::from_millis(10),
            echo: EchoConfig::none(),
            ..Default::default()
        }
    }

    fn attach() -> (Modem, DuplexStream) {
        let (host, device) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(host);
        (Modem::new(reader, writer, quick()), device)
    }

    async fn expect_command(device: &mut DuplexStream, command: &str) {
        let mut buf = vec![0u8; command.len() + 2];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, format!("{command}\r\n").into_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_sends_setup_sequence() {
        let (modem, mut device) = attach();
        modem.initialize().await.unwrap();
        for command in at::INIT_SEQUENCE {
            expect_command(&mut device, command).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_round_trip() {
        let (modem, mut device) = attach();
        let device_task = tokio::spawn(async move {
            expect_command(&mut device, "AT+KGTEMP").await;
            device.write_all(b"AT+KGTEMP\r\n+KGTEMP: -5\r\nOK\r\n").await.unwrap();
            device
        });

        let temp = modem
            .query("AT+KGTEMP", Duration::from_secs(2), |l: &Line| at::parse_temperature(l.text()))
            .await
            .unwrap();
        assert_eq!(temp, -5);
        assert_eq!(modem.pending_transactions(), 0);
        device_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_times_out() {
        let (modem, _device) = attach();
        let err = modem
            .query("AT+KGTEMP", Duration::from_secs(2), |l: &Line| at::parse_temperature(l.text()))
            .await
            .unwrap_err();
        assert!(matches!(err, ModemError::Timeout));
        assert_eq!(modem.pending_transactions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_reader() {
        let (modem, _device) = attach();
        assert!(modem.is_listening());
        modem.close().await.unwrap();
        assert!(!modem.is_listening());
    }
}
