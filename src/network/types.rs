use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

/// Security class of a Wi-Fi network, as far as prompting is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    Open,
    WpaPsk,
    /// Legacy WEP: privacy bit without WPA/RSN key management
    Wep,
    Enterprise,
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::WpaPsk => write!(f, "WPA-PSK"),
            Self::Wep => write!(f, "WEP"),
            Self::Enterprise => write!(f, "WPA-EAP"),
        }
    }
}

impl SecurityType {
    pub fn needs_password(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Classify from NetworkManager AP flags
    pub fn from_flags(flags: u32, wpa_flags: u32, rsn_flags: u32) -> Self {
        // NM80211ApSecurityFlags: KEY_MGMT_802_1X = 0x200
        if (rsn_flags | wpa_flags) & 0x200 != 0 {
            return Self::Enterprise;
        }
        if rsn_flags != 0 || wpa_flags != 0 {
            return Self::WpaPsk;
        }
        // NM80211ApFlags: Privacy = 0x1
        if flags & 0x1 != 0 {
            return Self::Wep;
        }
        Self::Open
    }
}

/// Signal bucket shown as bars, 0 (weak) to 3 (strong)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SignalBars(u8);

impl SignalBars {
    pub fn from_percentage(pct: u8) -> Self {
        match pct {
            0..=24 => Self(0),
            25..=49 => Self(1),
            50..=74 => Self(2),
            _ => Self(3),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Per-record connection indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    WrongPassword,
}

impl ConnectionState {
    /// True for the two states only one record may hold at a time
    pub fn holds_slot(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// A raw access point descriptor as reported by the wireless service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: Option<String>,
    pub security: SecurityType,
    /// Signal strength 0-100
    pub strength: u8,
    /// The station is currently associated with this AP
    pub active: bool,
}

/// One merged, user-facing network entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub bssid: Option<String>,
    pub security: SecurityType,
    pub signal: SignalBars,
    /// Raw strength of the AP this record was built from, used to pick
    /// the strongest of several APs sharing an ssid
    #[serde(skip)]
    pub strength: u8,
    pub known: bool,
    pub connection_state: ConnectionState,
}

/// Monotonic tag for a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal result of a connect command, as reported by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Success,
    AuthenticationRejected,
    Timeout,
    OtherFailure(String),
}

impl ConnectOutcome {
    /// Failed outcomes as the matching error
    pub fn into_result(self) -> NetResult<()> {
        match self {
            Self::Success => Ok(()),
            Self::AuthenticationRejected => Err(NetError::AuthenticationRejected),
            Self::Timeout => Err(NetError::Timeout("no answer from the access point".into())),
            Self::OtherFailure(msg) => Err(NetError::OtherFailure(msg)),
        }
    }
}

/// The network a connect command aims at, captured at connect time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub ssid: String,
    pub bssid: Option<String>,
    pub security: SecurityType,
    pub known: bool,
}

impl From<&NetworkRecord> for Target {
    fn from(record: &NetworkRecord) -> Self {
        Self {
            ssid: record.ssid.clone(),
            bssid: record.bssid.clone(),
            security: record.security,
            known: record.known,
        }
    }
}

/// Hotspot settings owned by the tethering controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetheringConfig {
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_from_nm_flags() {
        assert_eq!(SecurityType::from_flags(0, 0, 0), SecurityType::Open);
        assert_eq!(SecurityType::from_flags(1, 0, 0), SecurityType::Wep);
        assert!(SecurityType::Wep.needs_password());
        assert_eq!(SecurityType::from_flags(1, 0, 0x100), SecurityType::WpaPsk);
        assert_eq!(
            SecurityType::from_flags(1, 0, 0x200),
            SecurityType::Enterprise
        );
        assert_eq!(
            SecurityType::from_flags(1, 0x200, 0),
            SecurityType::Enterprise
        );
    }

    #[test]
    fn signal_buckets() {
        assert_eq!(SignalBars::from_percentage(0).get(), 0);
        assert_eq!(SignalBars::from_percentage(24).get(), 0);
        assert_eq!(SignalBars::from_percentage(25).get(), 1);
        assert_eq!(SignalBars::from_percentage(60).get(), 2);
        assert_eq!(SignalBars::from_percentage(100).get(), 3);
    }

    #[test]
    fn failed_outcomes_map_to_errors() {
        assert!(ConnectOutcome::Success.into_result().is_ok());
        assert!(matches!(
            ConnectOutcome::AuthenticationRejected.into_result(),
            Err(NetError::AuthenticationRejected)
        ));
        assert!(matches!(
            ConnectOutcome::Timeout.into_result(),
            Err(NetError::Timeout(_))
        ));
        assert!(matches!(
            ConnectOutcome::OtherFailure("dhcp".into()).into_result(),
            Err(NetError::OtherFailure(ref m)) if m == "dhcp"
        ));
    }

    #[test]
    fn only_connecting_and_connected_hold_the_slot() {
        assert!(ConnectionState::Connecting.holds_slot());
        assert!(ConnectionState::Connected.holds_slot());
        assert!(!ConnectionState::WrongPassword.holds_slot());
        assert!(!ConnectionState::NotConnected.holds_slot());
    }
}
