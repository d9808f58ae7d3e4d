//! What the presentation layer sees.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::connection::AttemptState;
use crate::network::types::{ConnectionState, NetworkRecord, SecurityType};
use crate::tethering::TetheringController;

/// One row of the network list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRow {
    pub ssid: String,
    pub bars: u8,
    pub locked: bool,
    pub known: bool,
    pub state: ConnectionState,
}

impl NetworkRow {
    pub fn connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn wrong_password(&self) -> bool {
        self.state == ConnectionState::WrongPassword
    }
}

impl From<&NetworkRecord> for NetworkRow {
    fn from(record: &NetworkRecord) -> Self {
        Self {
            ssid: record.ssid.clone(),
            bars: record.signal.get(),
            locked: record.security != SecurityType::Open,
            known: record.known,
            state: record.connection_state,
        }
    }
}

/// The attempt, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionView {
    #[default]
    Idle,
    NeedsPassword {
        ssid: String,
    },
    Connecting {
        ssid: String,
        attempt: u64,
    },
    Connected {
        ssid: String,
    },
    WrongPassword {
        ssid: String,
    },
    Failed {
        ssid: String,
        reason: String,
    },
}

impl From<&AttemptState> for ConnectionView {
    fn from(state: &AttemptState) -> Self {
        match state {
            AttemptState::Idle => Self::Idle,
            AttemptState::NeedsPassword { target } => Self::NeedsPassword {
                ssid: target.ssid.clone(),
            },
            AttemptState::Connecting(attempt) => Self::Connecting {
                ssid: attempt.target.ssid.clone(),
                attempt: attempt.id.0,
            },
            AttemptState::Connected { target, .. } => Self::Connected {
                ssid: target.ssid.clone(),
            },
            AttemptState::WrongPassword { target } => Self::WrongPassword {
                ssid: target.ssid.clone(),
            },
            AttemptState::Failed { target, reason } => Self::Failed {
                ssid: target.ssid.clone(),
                reason: reason.to_string(),
            },
        }
    }
}

/// Error strip across the top of the panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Banner {
    ScanFailed(String),
    WrongPassword(String),
    ConnectFailed(String),
    Tethering(String),
}

impl Banner {
    pub fn is_scan_failure(&self) -> bool {
        matches!(self, Self::ScanFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TetheringView {
    pub enabled: bool,
    pub switching: bool,
    pub ssid: String,
}

impl From<&TetheringController> for TetheringView {
    fn from(tethering: &TetheringController) -> Self {
        Self {
            enabled: tethering.is_enabled(),
            switching: tethering.is_switching(),
            ssid: tethering.config().ssid.clone(),
        }
    }
}

/// Read-only state pushed on every change
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UiSnapshot {
    pub networks: Vec<NetworkRow>,
    pub connection: ConnectionView,
    pub banner: Option<Banner>,
    pub tethering: TetheringView,
    /// The list is from an earlier scan than the last one attempted
    pub stale: bool,
    pub scanning: bool,
    pub last_scan: Option<DateTime<Local>>,
    pub ipv4_address: Option<String>,
}

impl UiSnapshot {
    pub fn network(&self, ssid: &str) -> Option<&NetworkRow> {
        self.networks.iter().find(|n| n.ssid == ssid)
    }
}
