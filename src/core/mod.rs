//! Core module containing the driver engine
//!
//! This module provides:
//! - Wire formats (CRLF lines, AT grammars, NMEA, HTTP, signal tables)
//! - Transaction registry matching lines to outstanding requests
//! - Line routing with the latest-value store and connection events
//! - Serialized command writes with a settle delay
//! - Position fix aggregation
//! - Status/power control capability
//! - Serial transport for the signal and data UARTs
//! - The [`Modem`](modem::Modem) device facade

pub mod error;
pub mod line;
pub mod location;
pub mod modem;
pub mod protocol;
pub mod router;
pub mod status;
pub mod transaction;
pub mod transport;
pub mod writer;
