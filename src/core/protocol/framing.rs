//! CRLF line framing for the signal channel
//!
//! The modem delimits every response and unsolicited report with `\r\n`.
//! [`CrLfLineCodec`] turns the raw serial byte stream into those lines and
//! frames outgoing AT commands the same way.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::error::ModemError;

/// Line delimiter used on both channels
pub const CRLF: &[u8] = b"\r\n";

/// Longest line kept before the buffer is treated as garbage
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Append the CRLF terminator to a command
pub fn encode_line(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + CRLF.len());
    result.extend_from_slice(data);
    result.extend_from_slice(CRLF);
    result
}

/// Position of the first `\r\n` in `data`
pub fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}

/// Streaming `\r\n` line decoder
///
/// Empty lines are skipped, the delimiter is stripped and bytes are
/// decoded lossily so a burst of line noise never stalls the reader.
#[derive(Debug, Default)]
pub struct CrLfLineCodec {
    /// Where the next delimiter search starts, so partial deliveries are
    /// not rescanned from the beginning
    next_index: usize,
}

impl CrLfLineCodec {
    /// Create new codec
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for CrLfLineCodec {
    type Item = String;
    type Error = ModemError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ModemError> {
        loop {
            let start = self.next_index.saturating_sub(1);
            let Some(offset) = find_crlf(&buf[start..]) else {
                if buf.len() > MAX_LINE_LENGTH {
                    tracing::warn!(len = buf.len(), "Discarding oversized undelimited input");
                    buf.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let position = start + offset;
            let line = buf.split_to(position + CRLF.len());
            self.next_index = 0;

            if position == 0 {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(&line[..position]).into_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ModemError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

impl<T: AsRef<str>> Encoder<T> for CrLfLineCodec {
    type Error = ModemError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ModemError> {
        let line = item.as_ref();
        dst.reserve(line.len() + CRLF.len());
        dst.put(line.as_bytes());
        dst.put(CRLF);
        Ok(())
    }
}
