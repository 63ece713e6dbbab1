//! AT command builders and response grammars for the LU1CM01x
//!
//! Builders return the command text without the line terminator; the
//! [`crate::core::writer::WriteSerializer`] appends `\r\n`. Parsers take a
//! single received line and return `None` when the line does not carry the
//! expected report at all, or an error when it does but is malformed.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Offset, TimeZone, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::signal::SignalQuality;
use crate::core::error::ModemError;

/// Echo off/on, result codes, verbose results: sent once after the port opens
pub const INIT_SEQUENCE: [&str; 3] = ["ATE1", "ATQ0", "ATV1"];

pub const CMD_USER_CLOCK: &str = "AT+CCLK?";
pub const CMD_NETWORK_CLOCK: &str = "AT+KCCLK?";
pub const CMD_SIGNAL_QUALITY: &str = "AT+CESQ=1";
pub const CMD_RADIO_STATE: &str = "AT+KRMDST?";
pub const CMD_TEMPERATURE: &str = "AT+KGTEMP";
pub const CMD_BATTERY: &str = "AT+KGBATINFO?";
pub const CMD_MODEL: &str = "AT+CGMM";
pub const CMD_VERSION: &str = "AT+CGMR";
pub const CMD_IMEI: &str = "AT+CGSN";
pub const CMD_POSITIONING_START: &str = "AT+KLBS=1";
pub const CMD_POSITIONING_STOP: &str = "AT+KLBS=0";
pub const CMD_SSL_COMMIT: &str = "AT+KSETSSL=9";

/// Line announcing an established data connection
pub const CONNECT_MARKER: &str = "CONNECT4NP";
/// Prefix of the line announcing a torn down data connection
pub const NO_CARRIER_PREFIX: &str = "NO CARRIER4NP:";
/// Line announcing a conflicting connection request
pub const REJECT_MARKER: &str = "REJECT";
/// Model names start with this
pub const MODEL_PREFIX: &str = "LU1CM0";

/// Radio function level (`AT+CFUN`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioFunction {
    /// Radio off
    Disabled = 0,
    /// Radio on
    Enabled = 1,
    /// Restart the unit
    Reboot = 6,
    /// Power the unit down
    Shutdown = 9,
}

impl RadioFunction {
    pub fn command(self) -> String {
        format!("AT+CFUN={}", self as u8)
    }
}

/// Reason decoded from `NO CARRIER4NP:<code>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectionReason {
    Normal = 0,
    PdnError = 1,
    HostNotFound = 2,
    SocketFailed = 3,
    ServerDisconnected = 4,
    SslFailed = 5,
    AlertReceived = 6,
    Unknown = 99,
}

impl DisconnectionReason {
    /// Look up a reported code; codes outside the table are unmapped
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::PdnError),
            2 => Some(Self::HostNotFound),
            3 => Some(Self::SocketFailed),
            4 => Some(Self::ServerDisconnected),
            5 => Some(Self::SslFailed),
            6 => Some(Self::AlertReceived),
            99 => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "Disconnected normally",
            Self::PdnError => "PDN connection error",
            Self::HostNotFound => "Host name not found",
            Self::SocketFailed => "Failed to establish socket",
            Self::ServerDisconnected => "Disconnected by server",
            Self::SslFailed => "Failed to establish SSL session",
            Self::AlertReceived => "Alert received",
            Self::Unknown => "Disconnected due to an unknown error",
        }
    }
}

impl std::fmt::Display for DisconnectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Parse the code of a `NO CARRIER4NP:<code>` line
pub fn parse_no_carrier(line: &str) -> Option<Option<u32>> {
    let rest = line.strip_prefix(NO_CARRIER_PREFIX)?;
    Some(rest.trim().parse().ok())
}

/// Human readable text for a disconnect line, `None` when unmapped
pub fn describe_no_carrier(code: Option<u32>) -> Option<&'static str> {
    code.and_then(DisconnectionReason::from_code).map(DisconnectionReason::description)
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("AT response regex is valid"))
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r#"^\+K?CCLK: "([0-9]{2})/([0-9]{2})/([0-9]{2}),([0-9]{2}):([0-9]{2}):([0-9]{2})([+-][0-9]{2})""#,
    )
}

/// Clock fields of a `+CCLK`/`+KCCLK` report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReport {
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Timezone offset in quarter hours
    pub quarter_hours: i32,
}

fn parse_clock(line: &str, prefix: &str) -> Option<Result<ClockReport, ModemError>> {
    if !line.starts_with(prefix) {
        return None;
    }
    let malformed = || ModemError::protocol(format!("malformed clock report: {line}"));
    let Some(caps) = clock_regex().captures(line) else {
        return Some(Err(malformed()));
    };
    let num = |i: usize| caps[i].parse::<i32>().unwrap_or_default();
    let Some(date) = NaiveDate::from_ymd_opt(2000 + num(1), num(2) as u32, num(3) as u32) else {
        return Some(Err(malformed()));
    };
    Some(Ok(ClockReport {
        date,
        hour: num(4) as u32,
        minute: num(5) as u32,
        second: num(6) as u32,
        quarter_hours: num(7),
    }))
}

fn clock_to_utc(report: &ClockReport, offset_minutes: i64) -> Result<DateTime<Utc>, ModemError> {
    let naive = report
        .date
        .and_hms_opt(report.hour, report.minute, report.second)
        .ok_or_else(|| ModemError::protocol("clock report out of range"))?;
    Ok(naive.and_utc() + Duration::minutes(offset_minutes))
}

/// `+CCLK: "yy/MM/dd,hh:mm:ss±zz"`, the user clock read back as UTC
pub fn parse_user_clock(line: &str) -> Option<Result<DateTime<Utc>, ModemError>> {
    parse_clock(line, "+CCLK").map(|r| r.and_then(|c| clock_to_utc(&c, 0)))
}

/// `+KCCLK: "yy/MM/dd,hh:mm:ss±zz"`, the network clock
///
/// The zone field is added to the minutes in quarter hours.
pub fn parse_network_clock(line: &str) -> Option<Result<DateTime<Utc>, ModemError>> {
    parse_clock(line, "+KCCLK")
        .map(|r| r.and_then(|c| clock_to_utc(&c, i64::from(c.quarter_hours) * 15)))
}

/// `AT+CCLK="yy/MM/dd,hh:mm:ss±zz"` in the given local time zone
pub fn set_user_clock<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    let offset_secs = at.offset().fix().local_minus_utc();
    let quarters = (f64::from(offset_secs) / 900.0).round() as i32;
    let sign = if quarters < 0 { '-' } else { '+' };
    format!(
        "AT+CCLK=\"{:02}/{:02}/{:02},{:02}:{:02}:{:02}{}{:02}\"",
        at.year() - 2000,
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        sign,
        quarters.abs()
    )
}

/// Same as [`set_user_clock`] for the host's local zone
pub fn set_user_clock_local(at: DateTime<Utc>) -> String {
    set_user_clock(&at.with_timezone(&Local))
}

fn cesq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\+CESQ: 99,99,255,255,([0-9]{1,3}),([0-9]{1,3}),([0-9]{1,3})")
}

/// `+CESQ: 99,99,255,255,<rsrq>,<rsrp>,<sinr>`
pub fn parse_signal_quality(line: &str) -> Option<Result<SignalQuality, ModemError>> {
    if !line.starts_with("+CESQ") {
        return None;
    }
    let parsed = cesq_regex().captures(line).and_then(|caps| {
        let rsrq = caps[1].parse::<u8>().ok()?;
        let rsrp = caps[2].parse::<u8>().ok()?;
        let sinr = caps[3].parse::<u8>().ok()?;
        Some(SignalQuality::from_raw(rsrq, rsrp, sinr))
    });
    Some(parsed.ok_or_else(|| ModemError::protocol(format!("signal quality report error: [{line}]"))))
}

/// Why the radio is currently off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioDisabled {
    pub thermal_protection: bool,
    pub module_disable: bool,
}

fn krmdst_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\+KRMDST: ([0-1])(?:,([0-9]{1,2}))?")
}

/// `+KRMDST: <status>[,<flags>]`: `Some(reasons)` when status is 0
pub fn parse_radio_state(line: &str) -> Option<Result<Option<RadioDisabled>, ModemError>> {
    if !line.starts_with("+KRMDST") {
        return None;
    }
    let Some(caps) = krmdst_regex().captures(line) else {
        return Some(Err(ModemError::protocol(format!("malformed radio state: {line}"))));
    };
    if &caps[1] != "0" {
        return Some(Ok(None));
    }
    let flags: u8 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    Some(Ok(Some(RadioDisabled {
        thermal_protection: flags & 2 != 0,
        module_disable: flags & 1 != 0,
    })))
}

fn temperature_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\+KGTEMP: ([+-]?[0-9]+)")
}

/// `+KGTEMP: ±n` in degrees Celsius
pub fn parse_temperature(line: &str) -> Option<Result<i32, ModemError>> {
    if !line.starts_with("+KGTEMP") {
        return None;
    }
    Some(
        temperature_regex()
            .captures(line)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or_else(|| ModemError::protocol(format!("malformed temperature: {line}"))),
    )
}

/// Battery report, values as the unit sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryInfo {
    pub amount: u32,
    pub status: u32,
}

fn battery_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\+KGBATINFO: ([0-9]+),([0-9]+)")
}

/// `+KGBATINFO: <amount>,<status>`
pub fn parse_battery(line: &str) -> Option<Result<BatteryInfo, ModemError>> {
    if !line.starts_with("+KGBATINFO") {
        return None;
    }
    let parsed = battery_regex().captures(line).and_then(|caps| {
        Some(BatteryInfo {
            amount: caps[1].parse().ok()?,
            status: caps[2].parse().ok()?,
        })
    });
    Some(parsed.ok_or_else(|| ModemError::protocol(format!("malformed battery info: {line}"))))
}

/// `LU1CM012` / `LU1CM013`
pub fn parse_model(line: &str) -> Option<String> {
    line.starts_with(MODEL_PREFIX).then(|| line.to_string())
}

fn imei_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"[0-9]{15}")
}

/// First run of 15 digits on the line
pub fn parse_imei(line: &str) -> Option<String> {
    imei_regex().find(line).map(|m| m.as_str().to_string())
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^[0-9a-zA-Z.]{7}$")
}

/// Firmware revision, a bare 7 character line
pub fn parse_version(line: &str) -> Option<String> {
    version_regex().is_match(line).then(|| line.to_string())
}

/// PDP context type for `AT+CGDCONT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdpType {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl Default for PdpType {
    fn default() -> Self {
        Self { ipv4: true, ipv6: false }
    }
}

impl PdpType {
    fn as_str(self) -> Result<&'static str, ModemError> {
        match (self.ipv4, self.ipv6) {
            (true, true) => Ok("IPV4V6"),
            (true, false) => Ok("IP"),
            (false, true) => Ok("IPV6"),
            (false, false) => Err(ModemError::InvalidArgument(
                "PDP type must enable at least one of IPv4 and IPv6".to_string(),
            )),
        }
    }
}

/// Authentication methods for `AT+CGAUTH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthType {
    pub pap: bool,
    pub chap: bool,
}

impl Default for AuthType {
    fn default() -> Self {
        Self { pap: true, chap: true }
    }
}

impl AuthType {
    fn bits(self) -> u8 {
        u8::from(self.pap) + u8::from(self.chap) * 2
    }
}

/// `AT+CGDCONT` and `AT+CGAUTH` for context 2, the one `AT+KDNP` uses
pub fn apn_commands(
    apn: &str,
    user: &str,
    password: &str,
    auth: AuthType,
    pdp: PdpType,
) -> Result<[String; 2], ModemError> {
    let pdp = pdp.as_str()?;
    let bits = auth.bits();
    let credentials = if bits == 0 {
        String::new()
    } else {
        format!(",\"{user}\",\"{password}\"")
    };
    Ok([
        format!("AT+CGDCONT=2,\"{pdp}\",{apn}"),
        format!("AT+CGAUTH=2,{bits}{credentials}"),
    ])
}

/// SORACOM APN preset
pub fn soracom_apn_commands() -> [String; 2] {
    [
        "AT+CGDCONT=2,\"IP\",\"soracom.io\"".to_string(),
        "AT+CGAUTH=2,3,\"sora\",\"sora\"".to_string(),
    ]
}

/// Transport protocol for `AT+KDNP`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketProtocol {
    Udp = 0,
    Tcp = 1,
    Ssl = 2,
}

/// `AT+KDNP=<addr>,<protocol>,,2`
///
/// Literal addresses go in the address slot, anything else is sent as a
/// host name for the unit to resolve.
pub fn connect_command(host: &str, port: u16, protocol: SocketProtocol) -> String {
    let addr = if host.parse::<Ipv4Addr>().is_ok() || host.parse::<Ipv6Addr>().is_ok() {
        format!("{host},,{port}")
    } else {
        format!(",{host},{port}")
    };
    format!("AT+KDNP={addr},{},,2", protocol as u8)
}

/// Certificate slot kind for `AT+KSETSSL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Client = 1,
    Ca = 2,
    Psk = 3,
}

/// Hex characters per `AT+KSETSSL` chunk
pub const SSL_CHUNK_HEX: usize = 200;

/// `AT+KSETSSL=1,<type>,<index>,<bytes>,<chunk>,<hex>` commands for one
/// certificate, padded with `F` to whole chunks
pub fn certificate_commands(key_type: KeyType, index: usize, der_or_pem: &[u8]) -> Vec<String> {
    let mut encoded = hex::encode(der_or_pem);
    let chunks = encoded.len().div_ceil(SSL_CHUNK_HEX).max(1);
    encoded.extend(std::iter::repeat('F').take(chunks * SSL_CHUNK_HEX - encoded.len()));

    (0..chunks)
        .map(|j| {
            let chunk = &encoded[j * SSL_CHUNK_HEX..(j + 1) * SSL_CHUNK_HEX];
            format!(
                "AT+KSETSSL=1,{},{},{},{},{}",
                key_type as u8,
                index + 1,
                der_or_pem.len(),
                j + 1,
                chunk
            )
        })
        .collect()
}

/// Client key passphrase
pub fn passphrase_command(passphrase: &str) -> String {
    format!("AT+KSETSSL=1,1,3,,,,{passphrase}")
}

/// Remove every certificate of a kind
pub fn delete_certificates_command(key_type: KeyType) -> String {
    format!("AT+KSETSSL=0,{}", key_type as u8)
}
