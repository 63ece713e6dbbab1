//! Integration tests driving a `Modem` against an in-memory device

use async_trait::async_trait;
use lu1cm_core::core::protocol::nmea::calculate_checksum;
use lu1cm_core::core::protocol::SocketProtocol;
use lu1cm_core::core::router::StoreValue;
use lu1cm_core::core::status::{PinChange, PinStates};
use lu1cm_core::{
    DataChannel, DataChannelOpener, EchoConfig, Modem, ModemError, ModemEvent, ModemOptions,
    StatusControl,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::broadcast;

fn options() -> ModemOptions {
    ModemOptions {
        settle_delay: Duration::from_millis(10),
        echo: EchoConfig::none(),
        ..Default::default()
    }
}

/// Fake unit on the far end of the signal channel
struct Device {
    io: BufReader<DuplexStream>,
}

impl Device {
    async fn command(&mut self) -> String {
        let mut line = String::new();
        self.io.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn reply<S: AsRef<str>>(&mut self, lines: &[S]) {
        for line in lines {
            self.io.get_mut().write_all(line.as_ref().as_bytes()).await.unwrap();
            self.io.get_mut().write_all(b"\r\n").await.unwrap();
        }
    }
}

fn attach() -> (Modem, Device) {
    let (host, device) = tokio::io::duplex(16 * 1024);
    let (reader, writer) = tokio::io::split(host);
    let modem = Modem::new(reader, writer, options());
    (
        modem,
        Device {
            io: BufReader::new(device),
        },
    )
}

fn nmea(body: &str) -> String {
    format!("${}*{:02X}", body, calculate_checksum(body))
}

const RMC: &str = "GNRMC,085120.30,A,3541.1493,N,13945.3994,E,0.0,0.0,150324,,,A,V";

fn gst(major: f64, minor: f64) -> String {
    nmea(&format!("GNGST,085120.30,10.5,{major},{minor},12.0,4.0,4.0,6.0"))
}

#[derive(Default)]
struct FakeStatus {
    connected: AtomicBool,
    enabled: AtomicUsize,
    disabled: AtomicUsize,
    events: Option<broadcast::Sender<PinChange>>,
}

#[async_trait]
impl StatusControl for FakeStatus {
    async fn is_connected(&self) -> lu1cm_core::Result<bool> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn set_data_enable(&self) -> lu1cm_core::Result<()> {
        self.enabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_data_disable(&self) -> lu1cm_core::Result<()> {
        self.disabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn power_on(&self) -> lu1cm_core::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> lu1cm_core::Result<()> {
        Ok(())
    }

    async fn reboot(&self) -> lu1cm_core::Result<()> {
        Ok(())
    }

    fn pin_states(&self) -> PinStates {
        PinStates::new()
    }

    fn subscribe(&self) -> broadcast::Receiver<PinChange> {
        match &self.events {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

/// Hands out one prepared in-memory data channel
struct FakeDataChannel {
    channel: Mutex<Option<DuplexStream>>,
}

impl FakeDataChannel {
    fn new() -> (Arc<Self>, DuplexStream) {
        let (host, server) = tokio::io::duplex(16 * 1024);
        (
            Arc::new(Self {
                channel: Mutex::new(Some(host)),
            }),
            server,
        )
    }
}

#[async_trait]
impl DataChannelOpener for FakeDataChannel {
    async fn open(&self) -> lu1cm_core::Result<Box<dyn DataChannel>> {
        match self.channel.lock().take() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(ModemError::ResourceConflict("already opened".to_string())),
        }
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

async fn read_request(server: &mut DuplexStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 256];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = server.read(&mut buf).await.unwrap();
        assert!(n > 0, "data channel closed early");
        request.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(request).unwrap()
}

#[tokio::test(start_paused = true)]
async fn location_fix_with_accuracy() {
    let (modem, mut device) = attach();
    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KLBS=1");
        device
            .reply(&[
                "OK".to_string(),
                gst(3.0, 3.0),
                nmea(RMC),
                gst(12.0, 4.0),
                gst(4.0, 2.5),
            ])
            .await;
        assert_eq!(device.command().await, "AT+KLBS=0");
        device
    });

    let fix = modem
        .get_location(5.0, Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert!(fix.success);
    assert_eq!(fix.accuracy, Some(4.0));
    assert!((fix.latitude - 35.685_821).abs() < 1e-5);
    assert_eq!(modem.pending_transactions(), 0);

    unit.await.unwrap();
    assert!(modem.snapshot().location("$GNRMC").is_some());
}

#[tokio::test(start_paused = true)]
async fn location_deadline_returns_partial_fix() {
    let (modem, mut device) = attach();
    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KLBS=1");
        device.reply(&[nmea(RMC), gst(30.0, 20.0)]).await;
        assert_eq!(device.command().await, "AT+KLBS=0");
        device
    });

    let fix = modem
        .get_location(5.0, Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(!fix.success);
    assert_eq!(fix.accuracy, Some(30.0));
    unit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn location_without_any_fix_times_out() {
    let (modem, mut device) = attach();
    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KLBS=1");
        device
            .reply(&[nmea("GNRMC,085120.30,V,,,,,,,150324,,,N,V")])
            .await;
        assert_eq!(device.command().await, "AT+KLBS=0");
        device
    });

    let err = modem
        .get_location(5.0, Some(Duration::from_secs(10)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    unit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrent_queries_resolve_independently() {
    let (modem, mut device) = attach();
    let unit = tokio::spawn(async move {
        let first = device.command().await;
        let second = device.command().await;
        let mut sent = vec![first, second];
        sent.sort();
        assert_eq!(sent, ["AT+KGBATINFO?", "AT+KGTEMP"]);
        // Battery first, although the temperature query registered first
        device.reply(&["+KGBATINFO: 80,1", "OK", "+KGTEMP: 42", "OK"]).await;
        device
    });

    let (temperature, battery) = tokio::join!(modem.get_temperature(), modem.get_battery_info());
    assert_eq!(temperature.unwrap(), 42);
    let battery = battery.unwrap();
    assert_eq!(battery.amount, 80);
    assert_eq!(battery.status, 1);
    unit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unsolicited_reports_reach_store_and_subscribers() {
    let (modem, mut device) = attach();
    let mut events = modem.subscribe();

    device.reply(&["+CEREG: 1", "NO CARRIER4NP:2"]).await;

    match events.recv().await.unwrap() {
        ModemEvent::Unsolicited(line) => assert_eq!(line.text(), "+CEREG: 1"),
        other => panic!("unexpected event {:?}", other),
    }
    match events.recv().await.unwrap() {
        ModemEvent::Disconnected { code, reason } => {
            assert_eq!(code, Some(2));
            assert_eq!(reason.unwrap().description(), "Host name not found");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let store = modem.snapshot();
    assert_eq!(
        store.message("CEREG").map(|v| &v.value),
        Some(&StoreValue::Text("1".to_string()))
    );
    assert_eq!(store.is_connected(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn connection_rejected_by_device() {
    let (modem, mut device) = attach();
    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KDNP=,example.com,443,2,,2");
        device.reply(&["NO CARRIER4NP:2"]).await;
        assert_eq!(device.command().await, "AT+KDNP=10.0.0.1,,80,1,,2");
        device.reply(&["REJECT"]).await;
        device
    });

    let err = modem
        .create_connection("example.com", 443, SocketProtocol::Ssl, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModemError::DeviceRejected(ref m) if m == "Host name not found"));

    let err = modem.create_tcp_connection("10.0.0.1", 80).await.unwrap_err();
    assert!(matches!(err, ModemError::DeviceRejected(_)));
    unit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn connection_times_out() {
    let (modem, _device) = attach();
    let err = modem
        .create_connection("example.com", 80, SocketProtocol::Tcp, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(modem.pending_transactions(), 0);
}

#[tokio::test(start_paused = true)]
async fn http_request_over_data_channel() {
    let (modem, mut device) = attach();
    let status = Arc::new(FakeStatus::default());
    let (opener, mut server) = FakeDataChannel::new();
    let modem = modem
        .with_status(status.clone())
        .with_data_channel(opener);

    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KDNP=,example.com,80,1,,2");
        device.reply(&["CONNECT4NP"]).await;
        device
    });
    let web = tokio::spawn(async move {
        let request = read_request(&mut server).await;
        server
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .await
            .unwrap();
        (request, server)
    });

    let response = modem
        .request_http("http://example.com/status", "GET", None, None)
        .await
        .unwrap();
    assert_eq!(response.status.code, "200");
    assert_eq!(response.text(), "hello world");
    assert!(response.complete);

    let (request, _server) = web.await.unwrap();
    assert_eq!(request, "GET /status HTTP/1.1\r\nHost: example.com:80\r\n\r\n");
    unit.await.unwrap();

    assert_eq!(status.enabled.load(Ordering::SeqCst), 1);
    assert_eq!(status.disabled.load(Ordering::SeqCst), 1);
    assert!(!modem.data_session_open());
}

#[tokio::test(start_paused = true)]
async fn http_request_refused_while_connected() {
    let (modem, _device) = attach();
    let status = Arc::new(FakeStatus::default());
    status.connected.store(true, Ordering::SeqCst);
    let (opener, _server) = FakeDataChannel::new();
    let modem = modem.with_status(status.clone()).with_data_channel(opener);

    let err = modem
        .request_http("http://example.com/", "GET", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModemError::ResourceConflict(_)));
    assert_eq!(status.enabled.load(Ordering::SeqCst), 0);
    assert!(!modem.data_session_open());
}

#[tokio::test(start_paused = true)]
async fn http_request_refused_after_reported_connection() {
    let (modem, mut device) = attach();
    let (opener, _server) = FakeDataChannel::new();
    let modem = modem.with_data_channel(opener.clone());

    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KDNP=10.0.0.1,,80,1,,2");
        device.reply(&["CONNECT4NP"]).await;
        device
    });
    modem.create_tcp_connection("10.0.0.1", 80).await.unwrap();
    let mut device = unit.await.unwrap();
    assert_eq!(modem.snapshot().is_connected(), Some(true));

    let err = modem
        .request_http("http://example.com/", "GET", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModemError::ResourceConflict(_)));
    assert!(!modem.data_session_open());
    assert!(opener.channel.lock().is_some());
    assert!(tokio::time::timeout(Duration::from_secs(5), device.command())
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn radio_changes_refused_during_data_session() {
    let (modem, mut device) = attach();
    let (opener, mut server) = FakeDataChannel::new();
    let modem = modem
        .with_status(Arc::new(FakeStatus::default()))
        .with_data_channel(opener);

    let unit = tokio::spawn(async move {
        assert_eq!(device.command().await, "AT+KDNP=,example.com,80,1,,2");
        device.reply(&["CONNECT4NP"]).await;
        device
    });
    let web = tokio::spawn(async move {
        read_request(&mut server).await;
        server
            .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        server
    });

    let (response, radio, second) = tokio::join!(
        modem.request_http("http://example.com/", "GET", None, None),
        modem.set_radio_disable(),
        modem.request_http("http://example.com/", "GET", None, None),
    );
    assert_eq!(response.unwrap().status.code, "204");
    assert!(matches!(radio, Err(ModemError::ResourceConflict(_))));
    assert!(matches!(second, Err(ModemError::ResourceConflict(_))));

    web.await.unwrap();
    unit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn http_without_data_channel_is_rejected() {
    let (modem, _device) = attach();
    let err = modem
        .request_http("http://example.com/", "GET", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModemError::InvalidArgument(_)));

    let err = modem
        .request_http("gopher://example.com/", "GET", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModemError::InvalidArgument(_)));
}
