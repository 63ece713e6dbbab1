//! Streaming HTTP/1.1 response decoder for the data channel
//!
//! The modem hands the raw TCP/SSL payload of the remote server straight
//! to the data UART. [`HttpDecoder`] reassembles one response at a time
//! from arbitrarily split reads: status line, headers, then a body framed
//! either by `Content-Length` or by chunked transfer encoding.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::{Bytes, BytesMut};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

use super::framing::{find_crlf, CRLF};
use crate::core::error::ModemError;

/// Largest chunk the decoder will buffer
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

fn status_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^HTTP/([0-9.]+) ([0-9]{3})(?: (.*))?$").expect("status line regex is valid")
    })
}

/// Parsed status line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStatus {
    /// Protocol version without the `HTTP/` prefix, e.g. `1.1`
    pub version: String,
    /// Three digit status code as sent
    pub code: String,
    /// Reason phrase
    pub reason: String,
}

impl HttpStatus {
    /// Parse `HTTP/<version> <code> <reason>`
    pub fn parse(line: &str) -> Option<Self> {
        let caps = status_line_regex().captures(line)?;
        Some(Self {
            version: caps[1].to_string(),
            code: caps[2].to_string(),
            reason: caps.get(3).map_or_else(String::new, |m| m.as_str().to_string()),
        })
    }

    /// Numeric status code
    pub fn code_u16(&self) -> Option<u16> {
        self.code.parse().ok()
    }
}

/// One decoded response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status line
    pub status: HttpStatus,
    /// Header fields, last occurrence wins
    pub headers: HashMap<String, String>,
    /// Body with any chunk framing removed
    pub body: Bytes,
    /// False when the response was flushed at end of stream before its
    /// framing completed
    pub complete: bool,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8 (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Chunked body progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// Expecting a hex size line
    Size,
    /// Expecting this many data bytes followed by CRLF
    Data(usize),
    /// After the zero chunk, consuming trailer fields up to the blank line
    Trailer,
}

/// How the body of the current response is framed
#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyMode {
    /// Still reading headers
    Unknown,
    /// `Content-Length` body
    Fixed(usize),
    /// Chunked transfer encoding, with the sizes collected so far
    Chunked { sizes: Vec<usize>, phase: ChunkPhase },
}

/// Streaming HTTP response decoder
#[derive(Debug)]
pub struct HttpDecoder {
    status: Option<HttpStatus>,
    headers: HashMap<String, String>,
    mode: BodyMode,
    body: BytesMut,
}

impl Default for HttpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDecoder {
    /// Create new decoder
    pub fn new() -> Self {
        Self {
            status: None,
            headers: HashMap::new(),
            mode: BodyMode::Unknown,
            body: BytesMut::new(),
        }
    }

    /// Feed bytes and collect every response they complete
    ///
    /// Convenience wrapper around [`Decoder::decode`] for callers that do
    /// not sit behind a `FramedRead`.
    pub fn feed(&mut self, buf: &mut BytesMut, data: &[u8]) -> Result<Vec<HttpResponse>, ModemError> {
        buf.extend_from_slice(data);
        let mut out = Vec::new();
        while let Some(response) = self.decode(buf)? {
            out.push(response);
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.mode = BodyMode::Unknown;
        self.body.clear();
    }

    fn has_progress(&self) -> bool {
        self.status.is_some() || !self.headers.is_empty() || self.mode != BodyMode::Unknown
    }

    fn emit(&mut self, complete: bool) -> HttpResponse {
        let response = HttpResponse {
            status: self.status.take().unwrap_or_default(),
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
            complete,
        };
        self.reset();
        response
    }

    fn fail(&mut self, buf: &mut BytesMut, msg: String) -> ModemError {
        tracing::warn!("HTTP framing error: {}", msg);
        self.reset();
        buf.clear();
        ModemError::Protocol(msg)
    }

    /// Pick the body mode once the header block has ended
    fn end_of_headers(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>, ModemError> {
        if let Some(length) = find_header(&self.headers, "Content-Length") {
            let Ok(size) = length.trim().parse::<usize>() else {
                let msg = format!("invalid Content-Length: {length}");
                return Err(self.fail(buf, msg));
            };
            self.mode = BodyMode::Fixed(size);
            return Ok(None);
        }

        let chunked = find_header(&self.headers, "Transfer-Encoding")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            self.mode = BodyMode::Chunked { sizes: Vec::new(), phase: ChunkPhase::Size };
            return Ok(None);
        }

        tracing::debug!("Response has no body framing, emitting without body");
        Ok(Some(self.emit(true)))
    }

    fn decode_headers(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>, ModemError> {
        while let Some(position) = find_crlf(buf) {
            let raw = buf.split_to(position + CRLF.len());
            let line = String::from_utf8_lossy(&raw[..position]);

            if line.is_empty() {
                if !self.has_progress() {
                    continue;
                }
                return self.end_of_headers(buf);
            }

            if line.starts_with("HTTP/") {
                match HttpStatus::parse(&line) {
                    Some(status) => self.status = Some(status),
                    None => {
                        let msg = format!("malformed status line: {line}");
                        return Err(self.fail(buf, msg));
                    }
                }
            } else if let Some((name, value)) = line.split_once(':') {
                self.headers.insert(name.to_string(), value.trim_start().to_string());
            } else {
                tracing::debug!(line = %line, "Ignoring header line without colon");
            }
        }
        Ok(None)
    }

    fn decode_chunks(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>, ModemError> {
        loop {
            let BodyMode::Chunked { sizes, phase } = &mut self.mode else {
                return Ok(None);
            };

            match *phase {
                ChunkPhase::Size => {
                    let Some(position) = find_crlf(buf) else {
                        return Ok(None);
                    };
                    let raw = buf.split_to(position + CRLF.len());
                    let line = String::from_utf8_lossy(&raw[..position]);
                    let size_field = line.split(';').next().unwrap_or_default().trim();
                    let Ok(size) = usize::from_str_radix(size_field, 16) else {
                        let msg = format!("invalid chunk size line: {line}");
                        return Err(self.fail(buf, msg));
                    };
                    if size > MAX_CHUNK_SIZE {
                        let msg = format!("chunk size {size} exceeds {MAX_CHUNK_SIZE} bytes");
                        return Err(self.fail(buf, msg));
                    }
                    if size == 0 {
                        *phase = ChunkPhase::Trailer;
                    } else {
                        sizes.push(size);
                        *phase = ChunkPhase::Data(size);
                    }
                }
                ChunkPhase::Data(size) => {
                    let Some(end) = size.checked_add(CRLF.len()) else {
                        let msg = format!("chunk size {size} overflows");
                        return Err(self.fail(buf, msg));
                    };
                    if buf.len() < end {
                        return Ok(None);
                    }
                    if &buf[size..end] != CRLF {
                        let msg = format!("chunk of declared size {size} is not followed by CRLF");
                        return Err(self.fail(buf, msg));
                    }
                    let data = buf.split_to(size);
                    let _ = buf.split_to(CRLF.len());
                    *phase = ChunkPhase::Size;
                    self.body.extend_from_slice(&data);
                }
                ChunkPhase::Trailer => {
                    let Some(position) = find_crlf(buf) else {
                        return Ok(None);
                    };
                    let raw = buf.split_to(position + CRLF.len());
                    if position == 0 {
                        let total: usize = sizes.iter().sum();
                        tracing::debug!(chunks = sizes.len(), total, "Chunked body complete");
                        return Ok(Some(self.emit(true)));
                    }
                    let line = String::from_utf8_lossy(&raw[..position]);
                    if let Some((name, value)) = line.split_once(':') {
                        self.headers.insert(name.to_string(), value.trim_start().to_string());
                    }
                }
            }
        }
    }
}

impl Decoder for HttpDecoder {
    type Item = HttpResponse;
    type Error = ModemError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>, ModemError> {
        loop {
            match self.mode {
                BodyMode::Unknown => {
                    if let Some(response) = self.decode_headers(buf)? {
                        return Ok(Some(response));
                    }
                    if self.mode == BodyMode::Unknown {
                        return Ok(None);
                    }
                }
                BodyMode::Fixed(size) => {
                    if buf.len() < size {
                        return Ok(None);
                    }
                    let data = buf.split_to(size);
                    self.body.extend_from_slice(&data);
                    return Ok(Some(self.emit(true)));
                }
                BodyMode::Chunked { .. } => return self.decode_chunks(buf),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>, ModemError> {
        if let Some(response) = self.decode(buf)? {
            return Ok(Some(response));
        }
        if !self.has_progress() {
            buf.clear();
            return Ok(None);
        }
        if let BodyMode::Fixed(_) = self.mode {
            self.body.extend_from_slice(buf);
        }
        buf.clear();
        tracing::warn!("Data stream ended mid-response, emitting partial response");
        Ok(Some(self.emit(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXED: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    const CHUNKED: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n";

    fn feed_in_pieces(data: &[u8], piece: usize) -> Vec<HttpResponse> {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for part in data.chunks(piece) {
            out.extend(decoder.feed(&mut buf, part).unwrap());
        }
        out
    }

    #[test]
    fn test_fixed_length_single_call() {
        let responses = feed_in_pieces(FIXED, FIXED.len());
        assert_eq!(responses.len(), 1);
        let r = &responses[0];
        assert_eq!(
            r.status,
            HttpStatus { version: "1.1".into(), code: "200".into(), reason: "OK".into() }
        );
        assert_eq!(r.headers.len(), 1);
        assert_eq!(r.headers.get("Content-Length").map(String::as_str), Some("5"));
        assert_eq!(&r.body[..], b"hello");
        assert!(r.complete);
    }

    #[test]
    fn test_fixed_length_byte_by_byte_is_identical() {
        let whole = feed_in_pieces(FIXED, FIXED.len());
        let split = feed_in_pieces(FIXED, 1);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_chunked_any_split() {
        for piece in 1..=CHUNKED.len() {
            let responses = feed_in_pieces(CHUNKED, piece);
            assert_eq!(responses.len(), 1, "piece size {piece}");
            assert_eq!(&responses[0].body[..], b"Wiki");
            assert_eq!(responses[0].header("transfer-encoding"), Some("chunked"));
        }
    }

    #[test]
    fn test_multiple_chunks_and_extensions() {
        let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;x=1\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\nExpires: never\r\n\r\n";
        let responses = feed_in_pieces(data, 3);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text(), "Wikipedia in\r\n\r\nchunks.");
        assert_eq!(responses[0].header("Expires"), Some("never"));
    }

    #[test]
    fn test_no_body_framing_emits_on_blank_line() {
        let responses = feed_in_pieces(b"HTTP/1.1 204 No Content\r\nServer: x\r\n\r\n", 4);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status.code_u16(), Some(204));
        assert!(responses[0].body.is_empty());
    }

    #[test]
    fn test_chunk_size_mismatch_is_fatal() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let bad = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nWiki\r\n0\r\n\r\n";
        let err = decoder.feed(&mut buf, bad).unwrap_err();
        assert!(matches!(err, ModemError::Protocol(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_chunk_size_is_fatal() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let bad = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert!(matches!(decoder.feed(&mut buf, bad), Err(ModemError::Protocol(_))));
    }

    #[test]
    fn test_oversized_chunk_size_is_fatal() {
        for size_line in ["FFFFFFFFFFFFFFFF", "1000001", "FFFFFFFFFFFFFFFFF"] {
            let mut decoder = HttpDecoder::new();
            let mut buf = BytesMut::new();
            let bad = format!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{size_line}\r\nab");
            let err = decoder.feed(&mut buf, bad.as_bytes()).unwrap_err();
            assert!(matches!(err, ModemError::Protocol(_)), "{size_line}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_largest_chunk_size_waits_for_data() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1000000\r\nab";
        assert!(decoder.feed(&mut buf, head).unwrap().is_empty());
    }

    #[test]
    fn test_back_to_back_responses() {
        let mut data = FIXED.to_vec();
        data.extend_from_slice(CHUNKED);
        let responses = feed_in_pieces(&data, 7);
        assert_eq!(responses.len(), 2);
        assert_eq!(&responses[0].body[..], b"hello");
        assert_eq!(&responses[1].body[..], b"Wiki");
    }

    #[test]
    fn test_eof_flushes_partial_response() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel";
        assert!(decoder.feed(&mut buf, partial).unwrap().is_empty());

        let flushed = decoder.decode_eof(&mut buf).unwrap().unwrap();
        assert!(!flushed.complete);
        assert_eq!(flushed.status.code, "200");
        assert_eq!(&flushed.body[..], b"hel");
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_eof_without_data_emits_nothing() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_status_line() {
        let mut decoder = HttpDecoder::new();
        let mut buf = BytesMut::new();
        let result = decoder.feed(&mut buf, b"HTTP/x 20 OK\r\n");
        assert!(matches!(result, Err(ModemError::Protocol(_))));
    }
}
