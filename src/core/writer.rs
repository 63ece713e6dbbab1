//! Serialized command writes with a settle delay
//!
//! The modem needs time to digest a command before it accepts the next
//! one. Every write holds the writer lock until the settle delay has
//! elapsed, so concurrent operations queue up behind each other.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::error::{ModemError, Result};
use super::protocol::framing::encode_line;

/// Pause after each command
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Boxed write half of a channel
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Callback receiving write failures under [`WriteErrorPolicy::Handler`]
pub type WriteErrorHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// What a failed write does to its caller
#[derive(Clone, Default)]
pub enum WriteErrorPolicy {
    /// Log with `tracing::error!` and report success
    #[default]
    LogAndContinue,
    /// Return the error to the caller
    Propagate,
    /// Hand the error to a callback and report success
    Handler(WriteErrorHandler),
}

impl fmt::Debug for WriteErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogAndContinue => write!(f, "LogAndContinue"),
            Self::Propagate => write!(f, "Propagate"),
            Self::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

/// Writes to one channel, one command at a time
#[derive(Clone)]
pub struct WriteSerializer {
    port: Arc<Mutex<Option<BoxedWriter>>>,
    settle_delay: Duration,
    policy: WriteErrorPolicy,
}

impl WriteSerializer {
    /// Wrap a writer with the default settle delay and error policy
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            port: Arc::new(Mutex::new(Some(Box::new(writer)))),
            settle_delay: DEFAULT_SETTLE_DELAY,
            policy: WriteErrorPolicy::default(),
        }
    }

    /// Set the settle delay
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the write error policy
    #[must_use]
    pub fn policy(mut self, policy: WriteErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Write `command` followed by `\r\n` and wait out the settle delay
    pub async fn write(&self, command: &str) -> Result<()> {
        debug!("< {}", command);
        self.write_locked(&encode_line(command.as_bytes())).await
    }

    /// Write bytes as-is and wait out the settle delay
    pub async fn write_raw(&self, data: &[u8]) -> Result<()> {
        debug!("< {} raw bytes", data.len());
        self.write_locked(data).await
    }

    /// Flush and shut the writer down; later writes fail with `NotConnected`
    pub async fn shutdown(&self) -> Result<()> {
        let writer = self.port.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn write_locked(&self, data: &[u8]) -> Result<()> {
        let mut port = self.port.lock().await;
        let outcome = match port.as_mut() {
            Some(writer) => Self::send(writer, data).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "writer is closed")),
        };
        let result = self.apply_policy(outcome);
        tokio::time::sleep(self.settle_delay).await;
        result
    }

    async fn send(writer: &mut BoxedWriter, data: &[u8]) -> io::Result<()> {
        writer.write_all(data).await?;
        writer.flush().await
    }

    fn apply_policy(&self, outcome: io::Result<()>) -> Result<()> {
        let Err(err) = outcome else {
            return Ok(());
        };
        match &self.policy {
            WriteErrorPolicy::LogAndContinue => {
                error!("Write failed: {}", err);
                Ok(())
            }
            WriteErrorPolicy::Propagate => Err(ModemError::Io(err)),
            WriteErrorPolicy::Handler(handler) => {
                handler(&err);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for WriteSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSerializer")
            .field("settle_delay", &self.settle_delay)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tokio_test::io::Builder;

    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_appends_crlf_and_settles() {
        let mock = Builder::new().write(b"AT+CESQ=1\r\n").build();
        let writer = WriteSerializer::new(mock);

        let start = Instant::now();
        writer.write("AT+CESQ=1").await.unwrap();
        assert!(start.elapsed() >= DEFAULT_SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_serialized_through_settle_delay() {
        let mock = Builder::new().write(b"ATE1\r\n").write(b"ATQ0\r\n").build();
        let writer = WriteSerializer::new(mock).settle_delay(Duration::from_millis(200));

        let start = Instant::now();
        let (a, b) = tokio::join!(writer.write("ATE1"), writer.write("ATQ0"));
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_write_has_no_terminator() {
        let mock = Builder::new().write(b"GET / HTTP/1.1").build();
        let writer = WriteSerializer::new(mock);
        writer.write_raw(b"GET / HTTP/1.1").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_logs_and_continues() {
        let mock = Builder::new().write_error(broken_pipe()).build();
        let writer = WriteSerializer::new(mock);
        assert!(writer.write("AT").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagate_policy_returns_io_error() {
        let mock = Builder::new().write_error(broken_pipe()).build();
        let writer = WriteSerializer::new(mock).policy(WriteErrorPolicy::Propagate);
        let err = writer.write("AT").await.unwrap_err();
        assert!(matches!(err, ModemError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_policy_receives_error() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mock = Builder::new().write_error(broken_pipe()).build();
        let writer = WriteSerializer::new(mock).policy(WriteErrorPolicy::Handler(Arc::new(
            move |_: &io::Error| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        assert!(writer.write("AT").await.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_shutdown_fails() {
        let mock = Builder::new().build();
        let writer = WriteSerializer::new(mock).policy(WriteErrorPolicy::Propagate);
        writer.shutdown().await.unwrap();
        let err = writer.write("AT").await.unwrap_err();
        assert!(matches!(err, ModemError::Io(ref e) if e.kind() == io::ErrorKind::NotConnected));
    }
}
