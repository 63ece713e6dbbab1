//! Status and power control lines of the unit
//!
//! The unit exposes handshake and power lines that the host drives over
//! GPIO. The engine only consumes the [`StatusControl`] capability;
//! [`GpioStatus`] implements it on top of any [`PinDriver`], which is the
//! one piece platform code has to provide.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::{ModemError, Result};

/// `FUNC_SW` high time that powers the unit on
pub const POWER_ON_PULSE: Duration = Duration::from_millis(1300);
/// `FUNC_SW` high time that powers the unit off
pub const SHUTDOWN_PULSE: Duration = Duration::from_millis(4500);
/// `RESET` high time that restarts the unit
pub const RESET_PULSE: Duration = Duration::from_millis(500);

/// Control lines of the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusPin {
    /// In: the module can communicate (low)
    Uart1Dtr,
    /// In: attached to the carrier network (low)
    Uart1Dcd,
    /// In: received data pending (high)
    TeUp,
    /// In: AT commands accepted (high)
    ResetChk,
    /// Out: high inhibits power saving
    PsmDisable,
    /// Out: low tells the unit the data UART is usable
    Uart1Dsr,
    /// Out: power switch, pulse length selects on/off
    FuncSw,
    /// Out: high restarts the unit
    Reset,
}

impl StatusPin {
    pub const ALL: [StatusPin; 8] = [
        Self::Uart1Dtr,
        Self::Uart1Dcd,
        Self::TeUp,
        Self::ResetChk,
        Self::PsmDisable,
        Self::Uart1Dsr,
        Self::FuncSw,
        Self::Reset,
    ];

    pub fn is_input(self) -> bool {
        matches!(self, Self::Uart1Dtr | Self::Uart1Dcd | Self::TeUp | Self::ResetChk)
    }

    /// Level an output is driven to during setup
    pub fn default_level(self) -> Option<bool> {
        match self {
            Self::PsmDisable => Some(true),
            Self::Uart1Dsr | Self::FuncSw | Self::Reset => Some(false),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uart1Dtr => "UART1_DTR",
            Self::Uart1Dcd => "UART1_DCD",
            Self::TeUp => "TE_UP",
            Self::ResetChk => "RESET_CHK",
            Self::PsmDisable => "PSM_DISABLE",
            Self::Uart1Dsr => "UART1_DSR",
            Self::FuncSw => "FUNC_SW",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for StatusPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host GPIO number per control line, unassigned lines are unused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinAssignment {
    pub uart1_dtr: Option<u32>,
    pub uart1_dcd: Option<u32>,
    pub te_up: Option<u32>,
    pub reset_chk: Option<u32>,
    pub psm_disable: Option<u32>,
    pub uart1_dsr: Option<u32>,
    pub func_sw: Option<u32>,
    pub reset: Option<u32>,
}

impl PinAssignment {
    pub fn get(&self, pin: StatusPin) -> Option<u32> {
        match pin {
            StatusPin::Uart1Dtr => self.uart1_dtr,
            StatusPin::Uart1Dcd => self.uart1_dcd,
            StatusPin::TeUp => self.te_up,
            StatusPin::ResetChk => self.reset_chk,
            StatusPin::PsmDisable => self.psm_disable,
            StatusPin::Uart1Dsr => self.uart1_dsr,
            StatusPin::FuncSw => self.func_sw,
            StatusPin::Reset => self.reset,
        }
    }

    /// Control line wired to a host GPIO number
    pub fn find(&self, number: u32) -> Option<StatusPin> {
        StatusPin::ALL.into_iter().find(|pin| self.get(*pin) == Some(number))
    }

    fn require(&self, pin: StatusPin) -> Result<u32> {
        self.get(pin)
            .ok_or_else(|| ModemError::Status(format!("{} is not assigned", pin)))
    }
}

/// Level change on an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PinChange {
    pub pin: StatusPin,
    pub level: bool,
}

/// Last known level per line
pub type PinStates = HashMap<StatusPin, bool>;

/// Status and power collaborator used by the modem facade
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusControl: Send + Sync {
    /// Is a data connection established on the carrier side?
    async fn is_connected(&self) -> Result<bool>;

    /// Signal the unit that the data UART may be used
    async fn set_data_enable(&self) -> Result<()>;

    async fn set_data_disable(&self) -> Result<()>;

    async fn power_on(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    async fn reboot(&self) -> Result<()>;

    /// Levels of all assigned lines
    fn pin_states(&self) -> PinStates;

    /// Input level changes
    fn subscribe(&self) -> broadcast::Receiver<PinChange>;
}

/// Raw GPIO access supplied by the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PinDriver: Send + Sync {
    async fn write(&self, pin: u32, level: bool) -> Result<()>;

    async fn read(&self, pin: u32) -> Result<bool>;
}

/// [`StatusControl`] over a [`PinDriver`]
pub struct GpioStatus<D> {
    driver: D,
    pins: PinAssignment,
    levels: RwLock<PinStates>,
    events: broadcast::Sender<PinChange>,
    power_busy: AtomicBool,
}

impl<D: PinDriver> GpioStatus<D> {
    pub fn new(driver: D, pins: PinAssignment) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            driver,
            pins,
            levels: RwLock::new(PinStates::new()),
            events,
            power_busy: AtomicBool::new(false),
        }
    }

    /// Drive outputs to their defaults and sample inputs
    pub async fn setup(&self) -> Result<()> {
        for pin in StatusPin::ALL {
            let Some(number) = self.pins.get(pin) else {
                continue;
            };
            let level = match pin.default_level() {
                Some(level) => {
                    self.driver.write(number, level).await?;
                    level
                }
                None => self.driver.read(number).await?,
            };
            debug!("{} (gpio {}) = {}", pin, number, level);
            self.levels.write().insert(pin, level);
        }
        Ok(())
    }

    /// Record an edge reported by the platform's GPIO event source
    pub fn notify_change(&self, number: u32, level: bool) {
        let Some(pin) = self.pins.find(number) else {
            return;
        };
        self.levels.write().insert(pin, level);
        let _ = self.events.send(PinChange { pin, level });
    }

    async fn set(&self, pin: StatusPin, level: bool) -> Result<()> {
        let number = self.pins.require(pin)?;
        self.driver.write(number, level).await?;
        self.levels.write().insert(pin, level);
        Ok(())
    }

    async fn pulse(&self, pin: StatusPin, width: Duration) -> Result<()> {
        let number = self.pins.require(pin)?;
        if self.power_busy.swap(true, Ordering::AcqRel) {
            return Err(ModemError::ResourceConflict(
                "power control already in progress".to_string(),
            ));
        }
        let result = async {
            self.driver.write(number, true).await?;
            tokio::time::sleep(width).await;
            self.driver.write(number, false).await
        }
        .await;
        self.power_busy.store(false, Ordering::Release);
        if let Err(ref e) = result {
            warn!("{} pulse failed: {}", pin, e);
        }
        result
    }
}

#[async_trait]
impl<D: PinDriver> StatusControl for GpioStatus<D> {
    async fn is_connected(&self) -> Result<bool> {
        self.pins.require(StatusPin::Uart1Dcd)?;
        Ok(self.levels.read().get(&StatusPin::Uart1Dcd) == Some(&false))
    }

    async fn set_data_enable(&self) -> Result<()> {
        self.set(StatusPin::Uart1Dsr, false).await
    }

    async fn set_data_disable(&self) -> Result<()> {
        self.set(StatusPin::Uart1Dsr, true).await
    }

    async fn power_on(&self) -> Result<()> {
        info!("Powering unit on");
        self.pulse(StatusPin::FuncSw, POWER_ON_PULSE).await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Powering unit off");
        self.pulse(StatusPin::FuncSw, SHUTDOWN_PULSE).await
    }

    async fn reboot(&self) -> Result<()> {
        info!("Resetting unit");
        self.pulse(StatusPin::Reset, RESET_PULSE).await
    }

    fn pin_states(&self) -> PinStates {
        self.levels.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<PinChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn pins() -> PinAssignment {
        PinAssignment {
            uart1_dcd: Some(16),
            psm_disable: Some(11),
            uart1_dsr: Some(5),
            func_sw: Some(38),
            reset: Some(40),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_setup_drives_outputs_and_samples_inputs() {
        let mut driver = MockPinDriver::new();
        driver.expect_read().with(eq(16)).returning(|_| Ok(true));
        driver.expect_write().with(eq(11), eq(true)).times(1).returning(|_, _| Ok(()));
        driver.expect_write().with(eq(5), eq(false)).times(1).returning(|_, _| Ok(()));
        driver.expect_write().with(eq(38), eq(false)).times(1).returning(|_, _| Ok(()));
        driver.expect_write().with(eq(40), eq(false)).times(1).returning(|_, _| Ok(()));

        let status = GpioStatus::new(driver, pins());
        status.setup().await.unwrap();
        let states = status.pin_states();
        assert_eq!(states.get(&StatusPin::Uart1Dcd), Some(&true));
        assert_eq!(states.get(&StatusPin::PsmDisable), Some(&true));
        assert!(!status.is_connected().await.unwrap());
    }

    #[tokio::test]
    async fn test_carrier_detect_edge() {
        let status = GpioStatus::new(MockPinDriver::new(), pins());
        let mut changes = status.subscribe();
        status.notify_change(16, false);
        assert!(status.is_connected().await.unwrap());
        assert_eq!(
            changes.try_recv().unwrap(),
            PinChange { pin: StatusPin::Uart1Dcd, level: false }
        );
        // Unassigned numbers are ignored
        status.notify_change(99, true);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unassigned_line_is_status_error() {
        let status = GpioStatus::new(MockPinDriver::new(), PinAssignment::default());
        assert!(matches!(status.is_connected().await, Err(ModemError::Status(_))));
        assert!(matches!(status.set_data_enable().await, Err(ModemError::Status(_))));
    }

    #[tokio::test]
    async fn test_data_enable_is_active_low() {
        let mut driver = MockPinDriver::new();
        let mut seq = Sequence::new();
        driver
            .expect_write()
            .with(eq(5), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        driver
            .expect_write()
            .with(eq(5), eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let status = GpioStatus::new(driver, pins());
        status.set_data_enable().await.unwrap();
        status.set_data_disable().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_pulses() {
        let mut driver = MockPinDriver::new();
        let mut seq = Sequence::new();
        driver
            .expect_write()
            .with(eq(38), eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        driver
            .expect_write()
            .with(eq(38), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let status = GpioStatus::new(driver, pins());
        let start = Instant::now();
        status.shutdown().await.unwrap();
        assert!(start.elapsed() >= SHUTDOWN_PULSE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_power_control_conflicts() {
        let mut driver = MockPinDriver::new();
        driver.expect_write().returning(|_, _| Ok(()));
        let status = Arc::new(GpioStatus::new(driver, pins()));

        let first = tokio::spawn({
            let status = Arc::clone(&status);
            async move { status.power_on().await }
        });
        tokio::task::yield_now().await;
        assert!(matches!(status.reboot().await, Err(ModemError::ResourceConflict(_))));
        first.await.unwrap().unwrap();
    }
}
