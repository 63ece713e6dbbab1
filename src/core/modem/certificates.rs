//! SSL key material on the unit (`AT+KSETSSL`)
//!
//! Every update takes the radio down first (`AT+CFUN=0`, `AT+KLBS=0`) and
//! holds the data channel claim, so no data session can start meanwhile.

use tracing::{info, warn};

use super::connection::ChannelClaim;
use super::Modem;
use crate::core::error::Result;
use crate::core::protocol::at::{self, KeyType, RadioFunction};

impl Modem {
    async fn prepare_key_update(&self, enable_data: bool) -> Result<ChannelClaim> {
        let claim = ChannelClaim::acquire(&self.data_busy, "certificate update")?;
        if enable_data {
            if let Some(status) = &self.status {
                if let Err(e) = status.set_data_enable().await {
                    warn!("Data enable failed: {}", e);
                }
            }
        }
        self.send(&RadioFunction::Disabled.command()).await?;
        self.send(at::CMD_POSITIONING_STOP).await?;
        tokio::time::sleep(self.options.certificate_wait).await;
        Ok(claim)
    }

    async fn write_key_material(&self, key_type: KeyType, items: &[&[u8]]) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            let commands = at::certificate_commands(key_type, index, item);
            info!(
                "Writing {:?} key {} ({} bytes, {} chunks)",
                key_type,
                index + 1,
                item.len(),
                commands.len()
            );
            for command in commands {
                self.send(&command).await?;
            }
        }
        Ok(())
    }

    /// Replace the CA certificates, returns how many were written
    pub async fn write_ca_certificates<C: AsRef<[u8]>>(&self, certificates: &[C]) -> Result<usize> {
        let _claim = self.prepare_key_update(true).await?;
        let items: Vec<&[u8]> = certificates.iter().map(|c| c.as_ref()).collect();
        self.write_key_material(KeyType::Ca, &items).await?;
        self.send(at::CMD_SSL_COMMIT).await?;
        Ok(items.len())
    }

    /// Replace the client certificate and its private key
    pub async fn write_client_certificates(
        &self,
        client_certificate: &[u8],
        private_key: &[u8],
        passphrase: Option<&str>,
    ) -> Result<()> {
        let _claim = self.prepare_key_update(true).await?;
        self.write_key_material(KeyType::Client, &[client_certificate, private_key])
            .await?;
        if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
            self.send(&at::passphrase_command(passphrase)).await?;
        }
        self.send(at::CMD_SSL_COMMIT).await
    }

    /// Replace the pre-shared key, `identity:key`
    pub async fn write_psk_certificates(&self, psk: &str) -> Result<()> {
        let _claim = self.prepare_key_update(true).await?;
        self.write_key_material(KeyType::Psk, &[psk.as_bytes()]).await?;
        self.send(at::CMD_SSL_COMMIT).await
    }

    /// Remove every stored key of one kind
    pub async fn delete_certificates(&self, key_type: KeyType) -> Result<()> {
        let _claim = self.prepare_key_update(false).await?;
        info!("Deleting {:?} keys", key_type);
        self.send(&at::delete_certificates_command(key_type)).await
    }
}
