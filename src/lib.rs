//! # lu1cm Core Library
//!
//! Host-side driver for LU1CM01x cellular/GPS multi units, talking AT
//! commands over a serial line:
//! - Signal channel (UART 0): commands, result reports, NMEA sentences
//! - Data channel (UART 1): raw payload once `AT+KDNP` connected it
//!
//! ## Features
//!
//! - Transaction matching of concurrent queries against one line stream
//! - Latest-value store and connection events
//! - Clock, signal quality, temperature, battery and identity queries
//! - Position fixes with an accuracy bound (`$GNRMC` + `$GNGST`)
//! - TCP/UDP/SSL connections and HTTP(S) requests over the data channel
//! - SSL certificate and APN provisioning
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use lu1cm_core::{Modem, ModemOptions, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 9600);
//!     let modem = Modem::open(&config, ModemOptions::default())?;
//!     modem.initialize().await?;
//!
//!     let signal = modem.get_signal_quality().await?;
//!     println!("RSRP: {:?} dB", signal.rsrp.db_range);
//!
//!     let fix = modem.get_location(10.0, None).await?;
//!     println!("{}, {}", fix.latitude, fix.longitude);
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::error::{ModemError, Result};
pub use crate::core::line::{Line, LineKind};
pub use crate::core::location::{LocationFixAggregator, PositionFix};
pub use crate::core::modem::{Modem, ModemOptions};
pub use crate::core::protocol::{HttpResponse, KeyType, SignalQuality};
pub use crate::core::router::{EchoConfig, LatestValueStore, LineRouter, ModemEvent};
pub use crate::core::status::{GpioStatus, PinAssignment, PinDriver, StatusControl};
pub use crate::core::transaction::{LineMatcher, Step, Transaction, TransactionRegistry};
pub use crate::core::transport::{
    DataChannel, DataChannelOpener, SerialConfig, SerialDataChannel, SerialFlowControl,
};
pub use crate::core::writer::{WriteErrorPolicy, WriteSerializer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
