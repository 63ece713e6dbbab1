//! Signal channel line routing
//!
//! Each received line is classified, recorded in the [`LatestValueStore`],
//! turned into a [`ModemEvent`] where it carries connection state, and then
//! offered to the transaction registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::line::{Line, LineKind};
use super::protocol::at::{self, DisconnectionReason};
use super::transaction::TransactionRegistry;

/// Key of the synthetic data connection flag in the message store
pub const CONNECTED_KEY: &str = "CONNECTED";

/// Which classes of incoming lines are echoed to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoConfig {
    /// `+KEY: value` reports
    pub result: bool,
    /// Command echo and plain result codes
    pub command: bool,
    /// `$` positioning sentences
    pub location: bool,
}

impl EchoConfig {
    pub fn all() -> Self {
        Self {
            result: true,
            command: true,
            location: true,
        }
    }

    pub fn none() -> Self {
        Self {
            result: false,
            command: false,
            location: false,
        }
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// Value recorded for a key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoreValue {
    Text(String),
    Flag(bool),
}

/// Latest value of a key and when it arrived
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredValue {
    pub timestamp: DateTime<Utc>,
    pub value: StoreValue,
}

/// Most recent value per key, overwrite only
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatestValueStore {
    messages: HashMap<String, StoredValue>,
    location: HashMap<String, StoredValue>,
}

impl LatestValueStore {
    /// Latest `+KEY` report (key without the `+`)
    pub fn message(&self, key: &str) -> Option<&StoredValue> {
        self.messages.get(key)
    }

    /// Latest `$KEY` sentence (key with the `$`)
    pub fn location(&self, key: &str) -> Option<&StoredValue> {
        self.location.get(key)
    }

    pub fn messages(&self) -> &HashMap<String, StoredValue> {
        &self.messages
    }

    pub fn locations(&self) -> &HashMap<String, StoredValue> {
        &self.location
    }

    /// Data connection state as last reported, `None` before any report
    pub fn is_connected(&self) -> Option<bool> {
        match self.messages.get(CONNECTED_KEY)?.value {
            StoreValue::Flag(flag) => Some(flag),
            StoreValue::Text(_) => None,
        }
    }

    fn set_message(&mut self, key: &str, value: StoreValue, timestamp: DateTime<Utc>) {
        self.messages
            .insert(key.to_string(), StoredValue { timestamp, value });
    }

    fn set_location(&mut self, key: &str, value: &str, timestamp: DateTime<Utc>) {
        self.location.insert(
            key.to_string(),
            StoredValue {
                timestamp,
                value: StoreValue::Text(value.to_string()),
            },
        );
    }
}

/// Events published by the router
#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    /// `CONNECT4NP`: data connection established
    Connected,
    /// `NO CARRIER4NP:<code>`: data connection closed
    Disconnected {
        code: Option<u32>,
        reason: Option<DisconnectionReason>,
    },
    /// `REJECT`: connection request conflicted with an existing one
    Rejected,
    /// A line no outstanding transaction consumed
    Unsolicited(Line),
}

/// Classifies lines, keeps the store current and feeds the registry
#[derive(Clone)]
pub struct LineRouter {
    registry: TransactionRegistry,
    store: Arc<RwLock<LatestValueStore>>,
    events: broadcast::Sender<ModemEvent>,
    echo: EchoConfig,
}

impl LineRouter {
    pub fn new(registry: TransactionRegistry, echo: EchoConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry,
            store: Arc::new(RwLock::new(LatestValueStore::default())),
            events,
            echo,
        }
    }

    /// Handle one line from the signal channel
    pub fn on_line(&self, text: &str) {
        let Some(line) = Line::classify(text) else {
            debug!("Dropping malformed line: {:?}", text);
            return;
        };
        let now = Utc::now();

        match line.kind() {
            LineKind::Location { key, value } => {
                if self.echo.location {
                    info!(target: "lu1cm::echo", "> {}", line);
                }
                self.store.write().set_location(key, value, now);
            }
            LineKind::Result { key, value } => {
                if self.echo.result {
                    info!(target: "lu1cm::echo", "> {}", line);
                }
                self.store
                    .write()
                    .set_message(key, StoreValue::Text(value.clone()), now);
            }
            LineKind::Plain => {
                if self.echo.command {
                    info!(target: "lu1cm::echo", "> {}", line);
                }
                self.on_plain(&line, now);
            }
        }

        if !self.registry.dispatch(&line) {
            let _ = self.events.send(ModemEvent::Unsolicited(line));
        }
    }

    fn on_plain(&self, line: &Line, now: DateTime<Utc>) {
        let text = line.text();
        if text == at::CONNECT_MARKER {
            self.store
                .write()
                .set_message(CONNECTED_KEY, StoreValue::Flag(true), now);
            info!("Data connection established");
            let _ = self.events.send(ModemEvent::Connected);
        } else if let Some(code) = at::parse_no_carrier(text) {
            self.store
                .write()
                .set_message(CONNECTED_KEY, StoreValue::Flag(false), now);
            let reason = code.and_then(DisconnectionReason::from_code);
            match reason {
                Some(reason) => info!("Data connection closed: {}", reason),
                None => info!("Data connection closed (code {:?})", code),
            }
            let _ = self.events.send(ModemEvent::Disconnected { code, reason });
        } else if text == at::REJECT_MARKER {
            info!("Connection request rejected");
            let _ = self.events.send(ModemEvent::Rejected);
        }
    }

    /// Snapshot of the latest values
    pub fn snapshot(&self) -> LatestValueStore {
        self.store.read().clone()
    }

    /// Shared handle to the store
    pub fn store(&self) -> Arc<RwLock<LatestValueStore>> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Subscribe to connection events and unsolicited lines
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events.subscribe()
    }
}
