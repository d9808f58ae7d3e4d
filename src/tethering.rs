//! Access-point (hotspot) mode.
//!
//! One mode switch may be in flight at a time. `enabled` only changes once
//! the service confirms a switch, so a failed switch leaves the previous
//! mode in place.

use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};
use crate::network::types::TetheringConfig;

/// WPA2 passphrase floor
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

/// A mode switch the caller must hand to the wireless service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetherSwitch {
    pub id: u64,
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
}

#[derive(Debug)]
pub struct TetheringController {
    config: TetheringConfig,
    min_password_len: usize,
    pending: Option<TetherSwitch>,
    last_id: u64,
}

impl TetheringController {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>, min_password_len: usize) -> Self {
        Self {
            config: TetheringConfig {
                enabled: false,
                ssid: ssid.into(),
                password: password.into(),
            },
            min_password_len,
            pending: None,
            last_id: 0,
        }
    }

    pub fn config(&self) -> &TetheringConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_switching(&self) -> bool {
        self.pending.is_some()
    }

    /// The radio is, or is about to be, an access point. Station scans
    /// cannot run in either case.
    pub fn blocks_station_mode(&self) -> bool {
        self.config.enabled || self.pending.as_ref().is_some_and(|s| s.enabled)
    }

    fn validate(&self, password: &str) -> NetResult<()> {
        if password.chars().count() < self.min_password_len {
            return Err(NetError::InvalidCredential(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }
        Ok(())
    }

    fn begin(&mut self, enabled: bool, password: String) -> TetherSwitch {
        self.last_id += 1;
        let switch = TetherSwitch {
            id: self.last_id,
            enabled,
            ssid: self.config.ssid.clone(),
            password,
        };
        self.pending = Some(switch.clone());
        switch
    }

    /// Request a mode switch. `Ok(None)` means the mode is already `enabled`.
    pub fn set_enabled(&mut self, enabled: bool) -> NetResult<Option<TetherSwitch>> {
        if self.pending.is_some() {
            return Err(NetError::Busy);
        }
        if self.config.enabled == enabled {
            debug!("Tethering already {}", if enabled { "on" } else { "off" });
            return Ok(None);
        }
        if enabled {
            self.validate(&self.config.password)?;
        }
        info!("Switching tethering {}", if enabled { "on" } else { "off" });
        Ok(Some(self.begin(enabled, self.config.password.clone())))
    }

    /// Change the hotspot password. While tethering is on the new password is
    /// pushed to the service as a fresh switch; otherwise it is kept for the
    /// next enable.
    pub fn set_password(&mut self, password: String) -> NetResult<Option<TetherSwitch>> {
        if self.pending.is_some() {
            return Err(NetError::Busy);
        }
        self.validate(&password)?;
        if self.config.enabled {
            info!("Re-applying tethering with a new password");
            return Ok(Some(self.begin(true, password)));
        }
        self.config.password = password;
        Ok(None)
    }

    /// Apply the service's answer to switch `id`. Returns `None` for an
    /// answer that does not match the pending switch.
    pub fn on_result(&mut self, id: u64, result: NetResult<()>) -> Option<NetResult<()>> {
        if self.pending.as_ref().map(|s| s.id) != Some(id) {
            debug!("Ignoring result for stale tether switch {}", id);
            return None;
        }
        let switch = self.pending.take()?;
        match result {
            Ok(()) => {
                info!(
                    "Tethering {} ('{}')",
                    if switch.enabled { "enabled" } else { "disabled" },
                    switch.ssid
                );
                self.config.enabled = switch.enabled;
                self.config.password = switch.password;
                Some(Ok(()))
            }
            Err(e) => {
                warn!("Tether switch {} failed: {}", id, e);
                Some(Err(e))
            }
        }
    }
}
