//! Protocol implementations
//!
//! Provides parsers, encoders, and helpers for the unit's wire formats:
//! - CRLF line framing for the signal channel
//! - AT command builders and response grammars
//! - Signal quality quantization tables
//! - NMEA 0183 (RMC, GST)
//! - HTTP/1.1 responses on the data channel

pub mod at;
pub mod framing;
pub mod http;
pub mod nmea;
pub mod signal;

pub use at::{
    AuthType, BatteryInfo, DisconnectionReason, KeyType, PdpType, RadioDisabled, RadioFunction,
    SocketProtocol,
};
pub use framing::CrLfLineCodec;
pub use http::{HttpDecoder, HttpResponse, HttpStatus};
pub use nmea::{NmeaError, NmeaSentence};
pub use signal::{SignalMetric, SignalQuality};
