//! The single connection attempt and its lifecycle.
//!
//! ```text
//! Idle ──connect──► Connecting ──► Connected | WrongPassword | Failed
//!   │                    ▲
//!   └──(secured, unknown, no secret)──► NeedsPassword ──connect──┘
//! ```
//!
//! The state machine is synchronous and never touches the radio itself.
//! `connect` hands back a [`ConnectCommand`] for the caller to execute;
//! the caller reports the result with the command's attempt id, and results
//! for any id other than the live one are dropped.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};
use crate::network::service::CredentialStore;
use crate::network::types::{AttemptId, ConnectOutcome, ConnectionState, Target};

/// Why an attempt ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    Timeout,
    /// The radio was switched to access-point mode mid-attempt
    TetheringEnabled,
    Service(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Connection timed out"),
            Self::TetheringEnabled => write!(f, "Interrupted by tethering"),
            Self::Service(msg) => write!(f, "Connection failed: {}", msg),
        }
    }
}

/// The live attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub id: AttemptId,
    pub target: Target,
    credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttemptState {
    #[default]
    Idle,
    /// Secured network never tried; waiting for the user's secret
    NeedsPassword { target: Target },
    Connecting(Attempt),
    Connected { id: AttemptId, target: Target },
    /// Tried, and the AP rejected the secret
    WrongPassword { target: Target },
    Failed { target: Target, reason: FailureReason },
}

impl AttemptState {
    pub fn target(&self) -> Option<&Target> {
        match self {
            Self::Idle => None,
            Self::NeedsPassword { target }
            | Self::Connected { target, .. }
            | Self::WrongPassword { target }
            | Self::Failed { target, .. } => Some(target),
            Self::Connecting(attempt) => Some(&attempt.target),
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }
}

/// Borrowed view of the record-level slot for the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSlot<'a> {
    pub ssid: &'a str,
    pub state: ConnectionState,
}

/// What the caller must ask the wireless service to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCommand {
    pub attempt: AttemptId,
    pub target: Target,
    pub credential: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: AttemptState,
    last_id: u64,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Id of the attempt currently `Connecting`, if any
    pub fn live_attempt(&self) -> Option<AttemptId> {
        match &self.state {
            AttemptState::Connecting(attempt) => Some(attempt.id),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<ActiveSlot<'_>> {
        let (ssid, state) = match &self.state {
            AttemptState::Connecting(attempt) => (&attempt.target.ssid, ConnectionState::Connecting),
            AttemptState::Connected { target, .. } => (&target.ssid, ConnectionState::Connected),
            AttemptState::WrongPassword { target } => (&target.ssid, ConnectionState::WrongPassword),
            _ => return None,
        };
        Some(ActiveSlot { ssid, state })
    }

    fn next_id(&mut self) -> AttemptId {
        self.last_id += 1;
        AttemptId(self.last_id)
    }

    /// Start an attempt on `target`.
    ///
    /// Returns `Ok(None)` when the target needs a secret first; the state is
    /// then `NeedsPassword` and nothing was sent to the radio.
    pub fn connect(
        &mut self,
        target: Target,
        credential: Option<String>,
        store: &dyn CredentialStore,
    ) -> NetResult<Option<ConnectCommand>> {
        if let AttemptState::Connecting(current) = &self.state {
            return Err(NetError::InvalidState(format!(
                "already connecting to '{}' ({})",
                current.target.ssid, current.id
            )));
        }

        let credential = credential.filter(|c| !c.is_empty());
        if credential.is_none() && target.security.needs_password() && !target.known {
            info!("'{}' needs a password", target.ssid);
            self.state = AttemptState::NeedsPassword { target };
            return Ok(None);
        }

        let credential = credential.or_else(|| {
            if target.security.needs_password() {
                store.credential(&target.ssid)
            } else {
                None
            }
        });

        let id = self.next_id();
        info!(
            "Connecting to '{}' via {} ({})",
            target.ssid,
            target.bssid.as_deref().unwrap_or("any bssid"),
            id
        );
        let command = ConnectCommand {
            attempt: id,
            target: target.clone(),
            credential: credential.clone(),
        };
        self.state = AttemptState::Connecting(Attempt {
            id,
            target,
            credential,
        });
        Ok(Some(command))
    }

    /// Apply the service's answer for `attempt`. Returns false if the answer
    /// was stale and ignored.
    pub fn on_outcome(
        &mut self,
        attempt: AttemptId,
        outcome: ConnectOutcome,
        store: &dyn CredentialStore,
    ) -> bool {
        let live = match &self.state {
            AttemptState::Connecting(live) if live.id == attempt => live,
            _ => {
                debug!("Discarding stale outcome {:?} for {}", outcome, attempt);
                return false;
            }
        };
        let Attempt {
            id,
            target,
            credential,
        } = live.clone();

        self.state = match outcome {
            ConnectOutcome::Success => {
                info!("Connected to '{}' ({})", target.ssid, id);
                remember(store, &target.ssid, credential.as_deref());
                AttemptState::Connected { id, target }
            }
            ConnectOutcome::AuthenticationRejected => {
                warn!("'{}' rejected the password ({})", target.ssid, id);
                if let Err(e) = store.clear_credential(&target.ssid) {
                    warn!("Failed to clear credential for '{}': {}", target.ssid, e);
                }
                AttemptState::WrongPassword { target }
            }
            ConnectOutcome::Timeout => {
                warn!("Connecting to '{}' timed out ({})", target.ssid, id);
                AttemptState::Failed {
                    target,
                    reason: FailureReason::Timeout,
                }
            }
            ConnectOutcome::OtherFailure(msg) => {
                warn!("Connecting to '{}' failed ({}): {}", target.ssid, id, msg);
                AttemptState::Failed {
                    target,
                    reason: FailureReason::Service(msg),
                }
            }
        };
        true
    }

    /// Local deadline for `attempt` expired
    pub fn on_timeout(&mut self, attempt: AttemptId) -> bool {
        if self.live_attempt() != Some(attempt) {
            return false;
        }
        self.force_fail(FailureReason::Timeout).is_some()
    }

    /// End a `Connecting` attempt as `Failed`. Returns the id the service
    /// should abandon.
    pub fn force_fail(&mut self, reason: FailureReason) -> Option<AttemptId> {
        let AttemptState::Connecting(attempt) = &self.state else {
            return None;
        };
        let id = attempt.id;
        let target = attempt.target.clone();
        warn!("Attempt {} on '{}' failed: {}", id, target.ssid, reason);
        self.state = AttemptState::Failed { target, reason };
        Some(id)
    }

    /// The station left the network it had joined (the radio went to
    /// access-point mode). Returns true if a `Connected` slot was released.
    pub fn release_connected(&mut self) -> bool {
        let AttemptState::Connected { id, target } = &self.state else {
            return false;
        };
        info!("Left '{}' ({})", target.ssid, id);
        self.state = AttemptState::Idle;
        true
    }

    /// Back to `Idle`. Returns the id of the in-flight attempt to hand to
    /// the service's cancel, if there was one. No-op when already idle.
    pub fn cancel(&mut self) -> Option<AttemptId> {
        if matches!(self.state, AttemptState::Idle) {
            return None;
        }
        let in_flight = self.live_attempt();
        // Burn an id so nothing issued before the cancel can match again
        let _ = self.next_id();
        self.state = AttemptState::Idle;
        debug!("Attempt cancelled (in flight: {:?})", in_flight);
        in_flight
    }

    /// Drop the saved secret for `ssid` and any state pointing at it
    pub fn forget(
        &mut self,
        ssid: &str,
        store: &dyn CredentialStore,
    ) -> NetResult<Option<AttemptId>> {
        store.clear_credential(ssid)?;
        info!("Forgot '{}'", ssid);
        let targets_ssid = self.state.target().is_some_and(|t| t.ssid == ssid);
        Ok(if targets_ssid { self.cancel() } else { None })
    }
}

fn remember(store: &dyn CredentialStore, ssid: &str, credential: Option<&str>) {
    let result = match credential {
        Some(secret) => store.save_credential(ssid, secret),
        // Keep whatever is already stored for a known network
        None if store.known_networks().contains(ssid) => Ok(()),
        None => store.save_credential(ssid, ""),
    };
    if let Err(e) = result {
        warn!("Failed to save credential for '{}': {}", ssid, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::store::MemoryCredentialStore;
    use crate::network::types::SecurityType;

    fn target(ssid: &str, security: SecurityType, known: bool) -> Target {
        Target {
            ssid: ssid.into(),
            bssid: Some(format!("bssid-{ssid}")),
            security,
            known,
        }
    }

    #[test]
    fn open_network_connects_without_credential() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();

        let cmd = sm
            .connect(target("Cafe", SecurityType::Open, false), None, &store)
            .unwrap()
            .expect("open network goes straight to the radio");
        assert_eq!(cmd.credential, None);
        assert!(sm.state().is_connecting());

        assert!(sm.on_outcome(cmd.attempt, ConnectOutcome::Success, &store));
        assert!(matches!(sm.state(), AttemptState::Connected { .. }));
        assert!(store.known_networks().contains("Cafe"));
    }

    #[test]
    fn unknown_secured_network_asks_for_password() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();

        let cmd = sm
            .connect(target("Home", SecurityType::WpaPsk, false), None, &store)
            .unwrap();
        assert!(cmd.is_none());
        assert!(matches!(sm.state(), AttemptState::NeedsPassword { .. }));
        assert!(sm.slot().is_none());

        let cmd = sm
            .connect(
                target("Home", SecurityType::WpaPsk, false),
                Some("hunter22".into()),
                &store,
            )
            .unwrap()
            .unwrap();
        assert_eq!(cmd.credential.as_deref(), Some("hunter22"));
    }

    #[test]
    fn known_network_reuses_stored_credential() {
        let store = MemoryCredentialStore::with_entries([("Home", "hunter22")]);
        let mut sm = ConnectionStateMachine::new();

        let cmd = sm
            .connect(target("Home", SecurityType::WpaPsk, true), None, &store)
            .unwrap()
            .unwrap();
        assert_eq!(cmd.credential.as_deref(), Some("hunter22"));
    }

    #[test]
    fn wrong_password_clears_stored_credential() {
        let store = MemoryCredentialStore::with_entries([("Home", "old-secret")]);
        let mut sm = ConnectionStateMachine::new();

        let cmd = sm
            .connect(
                target("Home", SecurityType::WpaPsk, true),
                Some("wrong-secret".into()),
                &store,
            )
            .unwrap()
            .unwrap();
        sm.on_outcome(cmd.attempt, ConnectOutcome::AuthenticationRejected, &store);

        assert!(matches!(sm.state(), AttemptState::WrongPassword { .. }));
        assert_eq!(store.credential("Home"), None);
        assert_eq!(
            sm.slot().map(|s| s.state),
            Some(ConnectionState::WrongPassword)
        );
    }

    #[test]
    fn second_connect_while_connecting_is_rejected() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();
        let first = sm
            .connect(target("Work", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();

        let err = sm
            .connect(target("Work2", SecurityType::Open, false), None, &store)
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidState(_)));
        assert_eq!(sm.live_attempt(), Some(first.attempt));
        assert_eq!(sm.state().target().unwrap().ssid, "Work");
    }

    #[test]
    fn stale_outcome_after_cancel_is_discarded() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();
        let work = sm
            .connect(target("Work", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();

        assert_eq!(sm.cancel(), Some(work.attempt));
        let work2 = sm
            .connect(target("Work2", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();
        assert!(work2.attempt > work.attempt);

        assert!(!sm.on_outcome(work.attempt, ConnectOutcome::Success, &store));
        assert!(sm.state().is_connecting());
        assert!(!store.known_networks().contains("Work"));

        assert!(sm.on_outcome(work2.attempt, ConnectOutcome::Success, &store));
        // Duplicate delivery of the same outcome is a no-op
        assert!(!sm.on_outcome(
            work2.attempt,
            ConnectOutcome::OtherFailure("late".into()),
            &store
        ));
        assert!(matches!(sm.state(), AttemptState::Connected { .. }));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.cancel(), None);
        assert_eq!(sm.cancel(), None);
        assert_eq!(sm.state(), &AttemptState::Idle);
    }

    #[test]
    fn timeout_fails_only_the_live_attempt() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();
        let cmd = sm
            .connect(target("Work", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();

        assert!(!sm.on_timeout(AttemptId(cmd.attempt.0 + 7)));
        assert!(sm.state().is_connecting());

        assert!(sm.on_timeout(cmd.attempt));
        assert!(matches!(
            sm.state(),
            AttemptState::Failed {
                reason: FailureReason::Timeout,
                ..
            }
        ));
        // The service's own late answer changes nothing
        assert!(!sm.on_outcome(cmd.attempt, ConnectOutcome::Success, &store));
    }

    #[test]
    fn service_timeout_fails_with_timeout_reason() {
        let store = MemoryCredentialStore::with_entries([("Home", "hunter22")]);
        let mut sm = ConnectionStateMachine::new();
        let cmd = sm
            .connect(target("Home", SecurityType::WpaPsk, true), None, &store)
            .unwrap()
            .unwrap();

        assert!(sm.on_outcome(cmd.attempt, ConnectOutcome::Timeout, &store));
        assert_eq!(
            sm.state(),
            &AttemptState::Failed {
                target: target("Home", SecurityType::WpaPsk, true),
                reason: FailureReason::Timeout,
            }
        );
        assert!(sm.live_attempt().is_none());
        assert!(sm.slot().is_none());
        // A timeout says nothing about the secret
        assert_eq!(store.credential("Home").as_deref(), Some("hunter22"));
    }

    #[test]
    fn release_connected_only_touches_connected() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();
        assert!(!sm.release_connected());

        let cmd = sm
            .connect(target("Cafe", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();
        assert!(!sm.release_connected());
        assert!(sm.state().is_connecting());

        sm.on_outcome(cmd.attempt, ConnectOutcome::Success, &store);
        assert!(sm.release_connected());
        assert_eq!(sm.state(), &AttemptState::Idle);
        assert!(sm.slot().is_none());
        assert!(store.known_networks().contains("Cafe"));
    }

    #[test]
    fn service_failure_is_surfaced_not_retried() {
        let store = MemoryCredentialStore::new();
        let mut sm = ConnectionStateMachine::new();
        let cmd = sm
            .connect(target("Work", SecurityType::Open, false), None, &store)
            .unwrap()
            .unwrap();
        sm.on_outcome(
            cmd.attempt,
            ConnectOutcome::OtherFailure("no carrier".into()),
            &store,
        );
        assert!(matches!(
            sm.state(),
            AttemptState::Failed {
                reason: FailureReason::Service(_),
                ..
            }
        ));
        assert!(sm.live_attempt().is_none());
    }

    #[test]
    fn forget_clears_secret_and_connected_state() {
        let store = MemoryCredentialStore::with_entries([("Home", "hunter22")]);
        let mut sm = ConnectionStateMachine::new();
        let cmd = sm
            .connect(target("Home", SecurityType::WpaPsk, true), None, &store)
            .unwrap()
            .unwrap();
        sm.on_outcome(cmd.attempt, ConnectOutcome::Success, &store);

        assert_eq!(sm.forget("Home", &store).unwrap(), None);
        assert_eq!(sm.state(), &AttemptState::Idle);
        assert!(!store.known_networks().contains("Home"));
    }
}
