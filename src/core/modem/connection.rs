//! `AT+KDNP` connections and HTTP over the data channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use serde::Serialize;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::Modem;
use crate::core::error::{ModemError, Result};
use crate::core::line::Line;
use crate::core::protocol::at::{self, DisconnectionReason, SocketProtocol};
use crate::core::protocol::http::{HttpDecoder, HttpResponse};
use crate::core::transport::DataChannelOpener;
use crate::core::writer::WriteSerializer;

/// Time allowed for `CONNECT4NP`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the whole HTTP response
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Methods that carry the JSON payload
const BODY_METHODS: [&str; 2] = ["POST", "PUT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    Http,
    Https,
}

impl HttpScheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Socket kind `AT+KDNP` opens for this scheme
    pub fn socket_protocol(self) -> SocketProtocol {
        match self {
            Self::Http => SocketProtocol::Tcp,
            Self::Https => SocketProtocol::Ssl,
        }
    }
}

/// Parsed `http(s)://host[:port][/path]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpTarget {
    pub scheme: HttpScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https?)://([^:/]+)(?::([0-9]+))?(/.*)?$").expect("URL regex is valid")
    })
}

impl HttpTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || ModemError::InvalidArgument(format!("URL parse error: {url}"));
        let caps = url_regex().captures(url.trim()).ok_or_else(invalid)?;

        let scheme = match &caps[1] {
            "https" => HttpScheme::Https,
            _ => HttpScheme::Http,
        };
        let port = match caps.get(3) {
            Some(port) => port.as_str().parse().map_err(|_| invalid())?,
            None => scheme.default_port(),
        };
        let path = caps.get(4).map_or("/", |m| m.as_str()).to_string();

        Ok(Self {
            scheme,
            host: caps[2].to_string(),
            port,
            path,
        })
    }
}

impl std::str::FromStr for HttpTarget {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Request bytes for the data channel
///
/// `POST` and `PUT` carry `payload` as JSON; other methods ignore it.
pub fn build_http_request(
    method: &str,
    target: &HttpTarget,
    payload: Option<&serde_json::Value>,
) -> Result<Vec<u8>> {
    let method = method.to_uppercase();
    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}:{}\r\n",
        method, target.path, target.host, target.port
    );

    let body = match payload {
        Some(payload) if BODY_METHODS.contains(&method.as_str()) => Some(
            serde_json::to_string(payload)
                .map_err(|e| ModemError::InvalidArgument(format!("payload: {e}")))?,
        ),
        Some(_) => {
            debug!("Ignoring payload for {} request", method);
            None
        }
        None => None,
    };

    match body {
        Some(body) => {
            request.push_str("Content-type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            request.push_str(&body);
        }
        None => request.push_str("\r\n"),
    }
    Ok(request.into_bytes())
}

/// Exclusive claim on the data channel, released on drop
pub(super) struct ChannelClaim {
    flag: Arc<AtomicBool>,
}

impl ChannelClaim {
    pub(super) fn acquire(flag: &Arc<AtomicBool>, purpose: &str) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ModemError::ResourceConflict(format!(
                "data channel already in use, cannot start {purpose}"
            )));
        }
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Matcher result for `AT+KDNP`
fn connection_outcome(line: &Line) -> Option<Result<()>> {
    let text = line.text();
    if text == at::CONNECT_MARKER {
        return Some(Ok(()));
    }
    if text == at::REJECT_MARKER {
        return Some(Err(ModemError::DeviceRejected(
            "conflict detected, is another connection already established?".to_string(),
        )));
    }
    let code = at::parse_no_carrier(text)?;
    let reason = code
        .and_then(DisconnectionReason::from_code)
        .map_or_else(|| format!("disconnected (code {:?})", code), |r| r.to_string());
    Some(Err(ModemError::DeviceRejected(reason)))
}

impl Modem {
    /// Open a socket to `host:port` through `AT+KDNP`
    ///
    /// Resolves on `CONNECT4NP`; `REJECT` and `NO CARRIER4NP` fail with
    /// [`ModemError::DeviceRejected`].
    pub async fn create_connection(
        &self,
        host: &str,
        port: u16,
        protocol: SocketProtocol,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.options.connect_timeout);
        info!("Connecting to {}:{} ({:?})", host, port, protocol);
        self.query(&at::connect_command(host, port, protocol), timeout, connection_outcome)
            .await
    }

    pub async fn create_tcp_connection(&self, host: &str, port: u16) -> Result<()> {
        self.create_connection(host, port, SocketProtocol::Tcp, None).await
    }

    pub async fn create_udp_connection(&self, host: &str, port: u16) -> Result<()> {
        self.create_connection(host, port, SocketProtocol::Udp, None).await
    }

    pub async fn create_ssl_connection(&self, host: &str, port: u16) -> Result<()> {
        self.create_connection(host, port, SocketProtocol::Ssl, None).await
    }

    /// Is a data session or certificate update in progress?
    pub fn data_session_open(&self) -> bool {
        self.data_busy.load(Ordering::Acquire)
    }

    /// Send one HTTP(S) request over the data channel
    ///
    /// Fails fast with [`ModemError::ResourceConflict`] when a connection
    /// is already established or another request holds the data channel.
    /// The channel is closed and data disabled again on every exit path.
    pub async fn request_http(
        &self,
        url: &str,
        method: &str,
        payload: Option<&serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let target = HttpTarget::parse(url)?;
        let request = build_http_request(method, &target, payload)?;
        let opener = self
            .data
            .clone()
            .ok_or_else(|| ModemError::InvalidArgument("no data channel configured".to_string()))?;

        let claim = ChannelClaim::acquire(&self.data_busy, "HTTP request")?;
        // The DCD line is authoritative; without it fall back to the last
        // CONNECT4NP / NO CARRIER4NP report
        let connected = match &self.status {
            Some(status) => status.is_connected().await?,
            None => self.router.snapshot().is_connected() == Some(true),
        };
        if connected {
            return Err(ModemError::ResourceConflict(
                "another connection is already established".to_string(),
            ));
        }
        if let Some(status) = &self.status {
            if let Err(e) = status.set_data_enable().await {
                warn!("Data enable failed: {}", e);
            }
        }

        let result = self
            .exchange(opener.as_ref(), &target, &request, timeout.unwrap_or(self.options.http_timeout))
            .await;

        if let Some(status) = &self.status {
            if let Err(e) = status.set_data_disable().await {
                warn!("Data disable failed: {}", e);
            }
        }
        drop(claim);
        info!("Data channel closed");
        result
    }

    async fn exchange(
        &self,
        opener: &dyn DataChannelOpener,
        target: &HttpTarget,
        request: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let channel = opener.open().await?;
        debug!("Data channel {} open", opener.describe());

        self.create_connection(&target.host, target.port, target.scheme.socket_protocol(), None)
            .await?;

        let (reader, writer) = tokio::io::split(channel);
        let writer = WriteSerializer::new(writer)
            .settle_delay(self.options.settle_delay)
            .policy(self.options.write_policy.clone());
        let mut responses = FramedRead::new(reader, HttpDecoder::new());

        let receive = async {
            writer.write_raw(request).await?;
            match responses.next().await {
                Some(response) => response,
                None => Err(ModemError::protocol("data channel closed before a response")),
            }
        };
        match tokio::time::timeout(timeout, receive).await {
            Ok(response) => {
                let response = response?;
                info!("HTTP {} {}", response.status.code, response.status.reason);
                Ok(response)
            }
            Err(_) => Err(ModemError::Timeout),
        }
    }
}
