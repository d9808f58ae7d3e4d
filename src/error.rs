use thiserror::Error;

/// Unified error type for the Wi-Fi controller
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Busy: a tethering switch is already in flight")]
    Busy,

    #[error("Authentication rejected by the access point")]
    AuthenticationRejected,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Wireless service error: {0}")]
    OtherFailure(String),

    #[error("Network not in catalog: {0}")]
    UnknownNetwork(String),

    #[error("No Wi-Fi device found")]
    NoWifiDevice,

    #[error("Controller task has stopped")]
    ControllerStopped,

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    DbusFdo(#[from] zbus::fdo::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl NetError {
    /// Errors the user has to act on (new password, different tether key).
    /// These are surfaced and never retried behind the user's back.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRejected | Self::InvalidCredential(_)
        )
    }
}

pub type NetResult<T> = Result<T, NetError>;
