//! Collaborator interfaces the controller is written against.
//!
//! `WirelessService` fronts the OS radio stack; `CredentialStore` is the
//! key-value store that remembers secrets per ssid. Both are black boxes to
//! the core: the controller only ever reaches them through these traits, so
//! the NetworkManager backend and the test fakes are interchangeable.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::NetResult;
use crate::network::types::{AccessPoint, AttemptId, ConnectOutcome, Target};

#[async_trait]
pub trait WirelessService: Send + Sync + 'static {
    /// Currently visible access points, one entry per physical AP
    async fn scan(&self) -> NetResult<Vec<AccessPoint>>;

    /// Join `target` (its bssid when known) and wait for a terminal outcome.
    ///
    /// `attempt` lets the service match a later `cancel` to this call.
    async fn connect(
        &self,
        attempt: AttemptId,
        target: &Target,
        credential: Option<&str>,
    ) -> ConnectOutcome;

    /// Abandon the given attempt. Best-effort.
    async fn cancel(&self, attempt: AttemptId) -> NetResult<()>;

    /// Switch the radio into (or out of) access-point mode
    async fn set_tether_mode(&self, enabled: bool, ssid: &str, password: &str) -> NetResult<()>;

    /// Station IPv4 address, when one is assigned
    async fn ipv4_address(&self) -> Option<String> {
        None
    }
}

pub trait CredentialStore: Send + Sync + 'static {
    fn known_networks(&self) -> HashSet<String>;

    fn credential(&self, ssid: &str) -> Option<String>;

    fn save_credential(&self, ssid: &str, secret: &str) -> NetResult<()>;

    fn clear_credential(&self, ssid: &str) -> NetResult<()>;
}
