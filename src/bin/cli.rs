//! lu1cm CLI - Command-line interface
//!
//! Drives an LU1CM01x unit over its signal (and optionally data) UART.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use lu1cm_core::cli::{print_exit_codes, render, CliResult, OutputFormat};
use lu1cm_core::config::{self, AppConfig};
use lu1cm_core::core::location::PositionFix;
use lu1cm_core::core::modem::Modem;
use lu1cm_core::core::protocol::{
    AuthType, BatteryInfo, KeyType, PdpType, RadioDisabled, SignalQuality,
};
use lu1cm_core::core::router::ModemEvent;
use lu1cm_core::core::transport::{list_ports, SerialConfig, SerialDataChannel};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// lu1cm CLI
#[derive(Parser, Debug)]
#[command(
    name = "lu1cm",
    version,
    about = "Host-side driver for LU1CM01x cellular/GPS units",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "LU1CM_CONFIG")]
    config: Option<PathBuf>,

    /// Signal port, overrides the config
    #[arg(short, long, env = "LU1CM_PORT")]
    port: Option<String>,

    /// Signal port baud rate, overrides the config
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data port, overrides the config
    #[arg(long, env = "LU1CM_DATA_PORT")]
    data_port: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Log as JSON records
    #[arg(long)]
    log_json: bool,

    /// Also log to a daily file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Query clocks, signal, temperature, battery and identity
    Info,

    /// Set the unit's user clock to the host's local time
    SetClock,

    /// Wait for a position fix
    Location {
        /// Required accuracy in meters
        #[arg(short, long, default_value = "10.0")]
        accuracy: f64,

        /// Give up after this many seconds (at most 600)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Send an HTTP(S) request over the data channel
    Http {
        /// `http(s)://host[:port][/path]`
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON payload for POST/PUT
        #[arg(short, long)]
        data: Option<String>,

        /// Receive timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Radio function
    Radio {
        #[arg(value_enum)]
        state: RadioState,
    },

    /// Reboot or shut the unit down
    Power {
        #[arg(value_enum)]
        action: PowerAction,
    },

    /// Configure the APN used for data connections
    Apn {
        /// Access point name
        #[arg(required_unless_present = "soracom")]
        apn: Option<String>,

        #[arg(short, long, default_value = "")]
        user: String,

        #[arg(short = 'P', long, default_value = "")]
        password: String,

        /// Disable PAP
        #[arg(long)]
        no_pap: bool,

        /// Disable CHAP
        #[arg(long)]
        no_chap: bool,

        /// Request an IPv6 context as well
        #[arg(long)]
        ipv6: bool,

        /// Use the SORACOM Air preset
        #[arg(long, conflicts_with = "apn")]
        soracom: bool,
    },

    /// Manage SSL key material
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },

    /// Print connection events and unsolicited lines until Ctrl-C
    Monitor,

    /// Show or create the config file
    Config {
        /// Write the current settings to the config file
        #[arg(long)]
        init: bool,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RadioState {
    On,
    Off,
    /// Report why the radio is disabled
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PowerAction {
    Reboot,
    Shutdown,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyKind {
    Client,
    Ca,
    Psk,
}

impl From<KeyKind> for KeyType {
    fn from(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Client => KeyType::Client,
            KeyKind::Ca => KeyType::Ca,
            KeyKind::Psk => KeyType::Psk,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CertAction {
    /// Replace the CA certificates
    Ca {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Replace the client certificate and key
    Client {
        certificate: PathBuf,
        key: PathBuf,
        #[arg(long, env = "LU1CM_KEY_PASSPHRASE")]
        passphrase: Option<String>,
    },
    /// Replace the pre-shared key (`identity:key`)
    Psk { psk: String },
    /// Delete all keys of one kind
    Delete {
        #[arg(value_enum)]
        kind: KeyKind,
    },
}

#[derive(Debug, Default, Serialize)]
struct InfoReport {
    model: Option<String>,
    version: Option<String>,
    imei: Option<String>,
    user_datetime: Option<chrono::DateTime<chrono::Utc>>,
    network_datetime: Option<chrono::DateTime<chrono::Utc>>,
    temperature: Option<i32>,
    battery: Option<BatteryInfo>,
    signal: Option<SignalQuality>,
    radio_disabled: Option<RadioDisabled>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match load_config(&cli) {
        Ok(config) => match init_logging(&cli, &config) {
            Ok(_guard) => run(&cli, config).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let outcome = match result {
        Ok(()) => CliResult::success(),
        Err(e) => CliResult::from(&e),
    };
    if let Some(msg) = outcome.message() {
        if !outcome.is_success() {
            eprintln!("Error: {}", msg);
        }
    }
    outcome.to_exit_code()
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(port) = &cli.port {
        config.ports.signal.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.ports.signal.baud_rate = baud;
    }
    if let Some(port) = &cli.data_port {
        let baud = config.ports.signal.baud_rate;
        config.ports.data = Some(match config.ports.data.take() {
            Some(data) => SerialConfig { port: port.clone(), ..data },
            None => SerialConfig::new(port, baud),
        });
    }
    Ok(config)
}

fn init_logging(cli: &Cli, config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        config.logging.filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json = cli.log_json || config.logging.json;
    let stderr = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let directory = cli.log_dir.clone().or_else(|| {
        config
            .logging
            .file
            .then(|| config.logging.directory.clone())
            .flatten()
    });
    let (file, guard) = match directory {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "lu1cm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()?;
    Ok(guard)
}

async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::ListPorts => show_ports(cli),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(())
        }
        Commands::Config { init } => show_config(cli, &config, *init),
        Commands::Info => show_info(cli, &connect(&config).await?).await,
        Commands::SetClock => {
            let modem = connect(&config).await?;
            let now = chrono::Local::now();
            modem.set_user_datetime(&now).await?;
            if !cli.quiet {
                println!("Clock set to {}", now.format("%Y-%m-%d %H:%M:%S %:z"));
            }
            Ok(())
        }
        Commands::Location { accuracy, timeout } => {
            let modem = connect(&config).await?;
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(config.timing.location_timeout_secs));
            let fix = modem.get_location(*accuracy, Some(timeout)).await?;
            println!("{}", render(&fix, cli.format, describe_fix)?);
            Ok(())
        }
        Commands::Http {
            url,
            method,
            data,
            timeout,
        } => {
            let payload = data
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .context("payload is not valid JSON")?;
            let data_port = config
                .ports
                .data
                .clone()
                .context("no data port configured, use --data-port")?;
            let modem = connect(&config)
                .await?
                .with_data_channel(Arc::new(SerialDataChannel::new(data_port)));
            let response = modem
                .request_http(url, method, payload.as_ref(), timeout.map(Duration::from_secs))
                .await?;

            match cli.format {
                OutputFormat::Text => {
                    println!(
                        "HTTP/{} {} {}",
                        response.status.version, response.status.code, response.status.reason
                    );
                    if cli.verbose {
                        for (name, value) in &response.headers {
                            println!("{}: {}", name, value);
                        }
                        println!();
                    }
                    println!("{}", response.text());
                }
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "status": response.status,
                        "headers": response.headers,
                        "body": response.text(),
                        "complete": response.complete,
                    });
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
            }
            Ok(())
        }
        Commands::Radio { state } => {
            let modem = connect(&config).await?;
            match state {
                RadioState::On => modem.set_radio_enable().await?,
                RadioState::Off => modem.set_radio_disable().await?,
                RadioState::Status => {
                    let disabled = modem.is_radio_disabled().await?;
                    println!(
                        "{}",
                        render(&disabled, cli.format, |d| match d {
                            None => "Radio enabled".to_string(),
                            Some(d) => format!(
                                "Radio disabled (thermal protection: {}, module disable: {})",
                                d.thermal_protection, d.module_disable
                            ),
                        })?
                    );
                }
            }
            Ok(())
        }
        Commands::Power { action } => {
            let modem = connect(&config).await?;
            match action {
                PowerAction::Reboot => modem.reboot().await?,
                PowerAction::Shutdown => modem.shutdown().await?,
            }
            Ok(())
        }
        Commands::Apn {
            apn,
            user,
            password,
            no_pap,
            no_chap,
            ipv6,
            soracom,
        } => {
            let modem = connect(&config).await?;
            if *soracom {
                modem.set_soracom_apn_info().await?;
            } else {
                let apn = apn.as_deref().context("APN is required")?;
                let auth = AuthType {
                    pap: !no_pap,
                    chap: !no_chap,
                };
                let pdp = PdpType {
                    ipv4: true,
                    ipv6: *ipv6,
                };
                modem
                    .set_apn_info(&format!("\"{apn}\""), user, password, auth, pdp)
                    .await?;
            }
            Ok(())
        }
        Commands::Cert { action } => {
            let modem = connect(&config).await?;
            match action {
                CertAction::Ca { files } => {
                    let certificates = files
                        .iter()
                        .map(|path| read_file(path))
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    let written = modem.write_ca_certificates(&certificates).await?;
                    if !cli.quiet {
                        println!("Wrote {} CA certificate(s)", written);
                    }
                }
                CertAction::Client {
                    certificate,
                    key,
                    passphrase,
                } => {
                    let certificate = read_file(certificate)?;
                    let key = read_file(key)?;
                    modem
                        .write_client_certificates(&certificate, &key, passphrase.as_deref())
                        .await?;
                }
                CertAction::Psk { psk } => modem.write_psk_certificates(psk).await?,
                CertAction::Delete { kind } => modem.delete_certificates((*kind).into()).await?,
            }
            Ok(())
        }
        Commands::Monitor => monitor(cli, &connect(&config).await?).await,
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<Modem> {
    let signal = &config.ports.signal;
    let modem = Modem::open(signal, config.to_modem_options())
        .with_context(|| format!("opening {}", signal.connection_info()))?;
    modem.initialize().await?;
    Ok(modem)
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn show_ports(cli: &Cli) -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() && cli.format == OutputFormat::Text {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }
    let text = render(&ports, cli.format, |ports| {
        ports
            .iter()
            .map(|p| match &p.product {
                Some(product) => format!("{} [{}] {}", p.name, p.kind, product),
                None => format!("{} [{}]", p.name, p.kind),
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    println!("{}", text);
    Ok(())
}

fn show_config(cli: &Cli, config: &AppConfig, init: bool) -> anyhow::Result<()> {
    if init {
        let path = match &cli.config {
            Some(path) => {
                config.save_to(path)?;
                path.clone()
            }
            None => config.save()?,
        };
        if !cli.quiet {
            println!("Wrote {}", path.display());
        }
        return Ok(());
    }
    match cli.format {
        OutputFormat::Text => {
            if let Some(path) = cli.config.clone().or_else(config::config_path) {
                println!("# {}", path.display());
            }
            print!("{}", toml::to_string_pretty(config)?);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

fn optional<T>(what: &str, result: lu1cm_core::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("{} unavailable: {}", what, e);
            None
        }
    }
}

async fn show_info(cli: &Cli, modem: &Modem) -> anyhow::Result<()> {
    let report = InfoReport {
        model: optional("model", modem.get_model_name().await),
        version: optional("version", modem.get_version().await),
        imei: optional("IMEI", modem.get_imei().await),
        user_datetime: optional("user clock", modem.get_user_datetime().await),
        network_datetime: optional("network clock", modem.get_network_datetime().await),
        temperature: optional("temperature", modem.get_temperature().await),
        battery: optional("battery", modem.get_battery_info().await),
        signal: optional("signal quality", modem.get_signal_quality().await),
        radio_disabled: optional("radio state", modem.is_radio_disabled().await).flatten(),
    };
    println!("{}", render(&report, cli.format, describe_info)?);
    Ok(())
}

fn describe_info(report: &InfoReport) -> String {
    fn field<T: std::fmt::Display>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string)
    }

    let mut lines = vec![
        format!("Model:            {}", field(&report.model)),
        format!("Version:          {}", field(&report.version)),
        format!("IMEI:             {}", field(&report.imei)),
        format!("User clock:       {}", field(&report.user_datetime)),
        format!("Network clock:    {}", field(&report.network_datetime)),
        format!(
            "Temperature:      {}",
            field(&report.temperature.map(|t| format!("{t} °C")))
        ),
    ];
    if let Some(battery) = report.battery {
        lines.push(format!(
            "Battery:          {} (status {})",
            battery.amount, battery.status
        ));
    }
    if let Some(signal) = report.signal {
        for (name, metric) in [
            ("RSRQ", signal.rsrq),
            ("RSRP", signal.rsrp),
            ("SINR", signal.sinr),
        ] {
            lines.push(format!(
                "{}:             {} .. {} dB (raw {})",
                name, metric.db_range[0], metric.db_range[1], metric.raw
            ));
        }
    }
    lines.push(match report.radio_disabled {
        None => "Radio:            enabled".to_string(),
        Some(d) => format!(
            "Radio:            disabled (thermal protection: {}, module disable: {})",
            d.thermal_protection, d.module_disable
        ),
    });
    lines.join("\n")
}

fn describe_fix(fix: &PositionFix) -> String {
    let accuracy = fix
        .accuracy
        .map_or_else(|| "unknown".to_string(), |a| format!("{a:.1} m"));
    format!(
        "{} {:.6}, {:.6} (accuracy {}){}",
        fix.datetime.format("%Y-%m-%d %H:%M:%S"),
        fix.latitude,
        fix.longitude,
        accuracy,
        if fix.success { "" } else { " [partial]" }
    )
}

async fn monitor(cli: &Cli, modem: &Modem) -> anyhow::Result<()> {
    let mut events = modem.subscribe();
    if !cli.quiet {
        eprintln!("Monitoring. Press Ctrl+C to exit.");
    }
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(cli.format, &event)?,
                Err(RecvError::Lagged(n)) => tracing::warn!("Monitor lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
    modem.close().await?;
    Ok(())
}

fn print_event(format: OutputFormat, event: &ModemEvent) -> anyhow::Result<()> {
    let json = match event {
        ModemEvent::Connected => serde_json::json!({ "event": "connected" }),
        ModemEvent::Disconnected { code, reason } => serde_json::json!({
            "event": "disconnected",
            "code": code,
            "reason": reason.map(|r| r.description()),
        }),
        ModemEvent::Rejected => serde_json::json!({ "event": "rejected" }),
        ModemEvent::Unsolicited(line) => serde_json::json!({
            "event": "line",
            "text": line.text(),
        }),
    };
    let text = render(&json, format, |_| match event {
        ModemEvent::Connected => "* connected".to_string(),
        ModemEvent::Disconnected { code, reason } => format!(
            "* disconnected ({})",
            reason
                .map(|r| r.description().to_string())
                .or_else(|| code.map(|c| format!("code {c}")))
                .unwrap_or_else(|| "no reason".to_string())
        ),
        ModemEvent::Rejected => "* rejected".to_string(),
        ModemEvent::Unsolicited(line) => line.text().to_string(),
    })?;
    println!("{}", text);
    Ok(())
}
