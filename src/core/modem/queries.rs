//! Single-command queries and settings

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use super::Modem;
use crate::core::error::{ModemError, Result};
use crate::core::line::Line;
use crate::core::protocol::at::{
    self, AuthType, BatteryInfo, PdpType, RadioDisabled, RadioFunction,
};
use crate::core::protocol::SignalQuality;

impl Modem {
    /// User clock (`AT+CCLK?`), the zone field is ignored
    pub async fn get_user_datetime(&self) -> Result<DateTime<Utc>> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_USER_CLOCK, timeout, |l: &Line| at::parse_user_clock(l.text()))
            .await
    }

    /// Set the user clock from a zoned timestamp
    pub async fn set_user_datetime<Tz: TimeZone>(&self, when: &DateTime<Tz>) -> Result<()> {
        self.send(&at::set_user_clock(when)).await
    }

    /// Network clock (`AT+KCCLK?`) with the reported zone applied
    pub async fn get_network_datetime(&self) -> Result<DateTime<Utc>> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_NETWORK_CLOCK, timeout, |l: &Line| {
            at::parse_network_clock(l.text())
        })
        .await
    }

    /// RSRQ, RSRP and SINR (`AT+CESQ=1`)
    pub async fn get_signal_quality(&self) -> Result<SignalQuality> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_SIGNAL_QUALITY, timeout, |l: &Line| {
            at::parse_signal_quality(l.text())
        })
        .await
    }

    /// Why the radio is off, `None` while it is usable (`AT+KRMDST?`)
    pub async fn is_radio_disabled(&self) -> Result<Option<RadioDisabled>> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_RADIO_STATE, timeout, |l: &Line| at::parse_radio_state(l.text()))
            .await
    }

    /// Internal temperature in °C (`AT+KGTEMP`)
    pub async fn get_temperature(&self) -> Result<i32> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_TEMPERATURE, timeout, |l: &Line| at::parse_temperature(l.text()))
            .await
    }

    pub async fn get_battery_info(&self) -> Result<BatteryInfo> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_BATTERY, timeout, |l: &Line| at::parse_battery(l.text()))
            .await
    }

    /// `LU1CM012` or `LU1CM013`
    pub async fn get_model_name(&self) -> Result<String> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_MODEL, timeout, |l: &Line| at::parse_model(l.text()).map(Ok))
            .await
    }

    /// Firmware revision
    pub async fn get_version(&self) -> Result<String> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_VERSION, timeout, |l: &Line| at::parse_version(l.text()).map(Ok))
            .await
    }

    pub async fn get_imei(&self) -> Result<String> {
        let timeout = self.options.command_timeout;
        self.query(at::CMD_IMEI, timeout, |l: &Line| at::parse_imei(l.text()).map(Ok))
            .await
    }

    /// Switch the radio function level (`AT+CFUN`)
    ///
    /// Refused while a data session is open.
    pub async fn set_radio_function(&self, function: RadioFunction) -> Result<()> {
        if self.data_session_open() {
            return Err(ModemError::ResourceConflict(format!(
                "cannot change radio function to {:?} during a data session",
                function
            )));
        }
        info!("Radio function -> {:?}", function);
        self.send(&function.command()).await
    }

    pub async fn set_radio_enable(&self) -> Result<()> {
        self.set_radio_function(RadioFunction::Enabled).await
    }

    pub async fn set_radio_disable(&self) -> Result<()> {
        self.set_radio_function(RadioFunction::Disabled).await
    }

    pub async fn set_radio_available(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.set_radio_enable().await
        } else {
            self.set_radio_disable().await
        }
    }

    /// Power the unit down (`AT+CFUN=9`)
    pub async fn shutdown(&self) -> Result<()> {
        self.set_radio_function(RadioFunction::Shutdown).await
    }

    /// Restart the unit (`AT+CFUN=6`)
    pub async fn reboot(&self) -> Result<()> {
        self.set_radio_function(RadioFunction::Reboot).await
    }

    /// APN used by `AT+KDNP` connections
    pub async fn set_apn_info(
        &self,
        apn: &str,
        user: &str,
        password: &str,
        auth: AuthType,
        pdp: PdpType,
    ) -> Result<()> {
        for command in at::apn_commands(apn, user, password, auth, pdp)? {
            self.send(&command).await?;
        }
        Ok(())
    }

    /// APN preset for SORACOM Air SIMs
    pub async fn set_soracom_apn_info(&self) -> Result<()> {
        for command in at::soracom_apn_commands() {
            self.send(&command).await?;
        }
        Ok(())
    }
}
