//! Merged view of visible and saved networks.
//!
//! The catalog never talks to the radio on its own schedule: it is handed a
//! scan result (or asked to fetch one via [`NetworkCatalog::refresh`]) and
//! rebuilds its records from it. Per-record connection state is not stored
//! independently; it is re-derived from the state machine's single slot so
//! two records can never both claim to be connecting or connected.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::connection::ActiveSlot;
use crate::error::{NetError, NetResult};
use crate::network::service::{CredentialStore, WirelessService};
use crate::network::types::{AccessPoint, ConnectionState, NetworkRecord, SignalBars};

/// Result of one refresh: the list to show, plus the scan error if the list
/// is the previous snapshot rather than a fresh one
#[derive(Debug)]
pub struct RefreshOutcome {
    pub records: Vec<NetworkRecord>,
    pub scan_error: Option<NetError>,
}

impl RefreshOutcome {
    pub fn is_ok(&self) -> bool {
        self.scan_error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct NetworkCatalog {
    records: Vec<NetworkRecord>,
    /// ssid the service last reported the station as associated with
    associated: Option<String>,
    last_scan: Option<DateTime<Local>>,
    stale: bool,
}

impl NetworkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[NetworkRecord] {
        &self.records
    }

    pub fn find(&self, ssid: &str) -> Option<&NetworkRecord> {
        self.records.iter().find(|r| r.ssid == ssid)
    }

    pub fn last_scan(&self) -> Option<DateTime<Local>> {
        self.last_scan
    }

    /// The list shown is older than the last scan attempt
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Keep the current list on screen while scanning is suspended
    pub fn freeze(&mut self) {
        self.stale = true;
    }

    /// The station is off every network until the next scan says otherwise
    pub fn clear_association(&mut self) {
        self.associated = None;
    }

    /// Scan, merge with the credential store and return the ordered list.
    ///
    /// On failure the previous list is returned untouched.
    pub async fn refresh(
        &mut self,
        service: &dyn WirelessService,
        store: &dyn CredentialStore,
        slot: Option<ActiveSlot<'_>>,
    ) -> RefreshOutcome {
        let scan = service.scan().await;
        let known = store.known_networks();
        self.apply_scan(scan, &known, slot)
    }

    /// Fold a finished scan into the catalog
    pub fn apply_scan(
        &mut self,
        scan: NetResult<Vec<AccessPoint>>,
        known: &HashSet<String>,
        slot: Option<ActiveSlot<'_>>,
    ) -> RefreshOutcome {
        let access_points = match scan {
            Ok(aps) => aps,
            Err(e) => {
                let e = match e {
                    NetError::ScanFailed(_) => e,
                    other => NetError::ScanFailed(other.to_string()),
                };
                warn!("{}; keeping {} cached network(s)", e, self.records.len());
                self.stale = true;
                return RefreshOutcome {
                    records: self.records.clone(),
                    scan_error: Some(e),
                };
            }
        };

        let raw_count = access_points.len();
        let strongest = strongest_per_ssid(access_points);

        self.associated = strongest
            .values()
            .find(|ap| ap.active)
            .map(|ap| ap.ssid.clone());

        self.records = strongest
            .into_values()
            .map(|ap| NetworkRecord {
                known: known.contains(&ap.ssid),
                signal: SignalBars::from_percentage(ap.strength),
                strength: ap.strength,
                ssid: ap.ssid,
                bssid: ap.bssid,
                security: ap.security,
                connection_state: ConnectionState::NotConnected,
            })
            .collect();
        self.restyle(slot);

        self.stale = false;
        self.last_scan = Some(Local::now());
        debug!(
            "Catalog refreshed: {} AP(s) -> {} network(s)",
            raw_count,
            self.records.len()
        );

        RefreshOutcome {
            records: self.records.clone(),
            scan_error: None,
        }
    }

    /// Refresh `known` flags after the credential store changed, without
    /// waiting for the next scan
    pub fn rejoin_known(&mut self, known: &HashSet<String>) {
        for record in &mut self.records {
            record.known = known.contains(&record.ssid);
        }
    }

    /// Re-derive every record's connection state from the slot and re-sort
    pub fn restyle(&mut self, slot: Option<ActiveSlot<'_>>) {
        let associated = self.associated.as_deref();
        for record in &mut self.records {
            record.connection_state = state_for(&record.ssid, slot, associated);
        }
        self.records.sort_by(display_order);
    }
}

/// Collapse APs sharing an ssid into the strongest one. Hidden (empty ssid)
/// APs are dropped.
fn strongest_per_ssid(access_points: Vec<AccessPoint>) -> HashMap<String, AccessPoint> {
    let mut by_ssid: HashMap<String, AccessPoint> = HashMap::new();
    for ap in access_points {
        if ap.ssid.is_empty() {
            continue;
        }
        match by_ssid.get_mut(&ap.ssid) {
            Some(existing) => {
                let active = existing.active || ap.active;
                if ap.strength > existing.strength {
                    *existing = ap;
                }
                existing.active = active;
            }
            None => {
                by_ssid.insert(ap.ssid.clone(), ap);
            }
        }
    }
    by_ssid
}

fn state_for(ssid: &str, slot: Option<ActiveSlot<'_>>, associated: Option<&str>) -> ConnectionState {
    match slot {
        Some(slot) if slot.ssid == ssid => slot.state,
        // Someone else owns the slot; the radio has left whatever it was on
        Some(slot) if slot.state.holds_slot() => ConnectionState::NotConnected,
        _ if associated == Some(ssid) => ConnectionState::Connected,
        _ => ConnectionState::NotConnected,
    }
}

/// Slot holder first, then known, then unknown; strongest first inside a
/// group; ssid bytes break ties.
fn display_order(a: &NetworkRecord, b: &NetworkRecord) -> Ordering {
    fn group(r: &NetworkRecord) -> u8 {
        if r.connection_state.holds_slot() {
            0
        } else if r.known {
            1
        } else {
            2
        }
    }

    group(a)
        .cmp(&group(b))
        .then_with(|| b.signal.cmp(&a.signal))
        .then_with(|| a.ssid.as_bytes().cmp(b.ssid.as_bytes()))
}
