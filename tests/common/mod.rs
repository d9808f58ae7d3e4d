//! Scripted `WirelessService` for driving the controller from tests.
//!
//! Scans answer immediately from a mutable AP list. Connects and tether
//! switches are parked until the test answers them through the request it
//! receives, so every interleaving is in the test's hands.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use offroad_net::{
    AccessPoint, AttemptId, ConnectOutcome, Controller, ControllerHandle, ControllerSettings,
    MemoryCredentialStore, NetError, NetResult, SecurityType, Target, UiSnapshot,
    WirelessService,
};

pub struct ConnectRequest {
    pub attempt: AttemptId,
    pub ssid: String,
    pub credential: Option<String>,
    respond: oneshot::Sender<ConnectOutcome>,
}

impl ConnectRequest {
    pub fn answer(self, outcome: ConnectOutcome) {
        let _ = self.respond.send(outcome);
    }
}

pub struct TetherRequest {
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
    respond: oneshot::Sender<NetResult<()>>,
}

impl TetherRequest {
    pub fn answer(self, result: NetResult<()>) {
        let _ = self.respond.send(result);
    }
}

pub struct FakeService {
    access_points: Mutex<Vec<AccessPoint>>,
    fail_scans: AtomicBool,
    scan_times: Mutex<Vec<Instant>>,
    cancels: Mutex<Vec<AttemptId>>,
    connects: mpsc::UnboundedSender<ConnectRequest>,
    tethers: mpsc::UnboundedSender<TetherRequest>,
}

impl FakeService {
    pub fn access_points(&self, aps: Vec<AccessPoint>) {
        *self.access_points.lock().unwrap() = aps;
    }

    /// Mark `ssid` as the network the station is on
    pub fn associate(&self, ssid: &str) {
        for ap in self.access_points.lock().unwrap().iter_mut() {
            ap.active = ap.ssid == ssid;
        }
    }

    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    pub fn scan_count(&self) -> usize {
        self.scan_times.lock().unwrap().len()
    }

    /// Gaps between consecutive scans
    pub fn scan_gaps(&self) -> Vec<Duration> {
        let times = self.scan_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn cancels(&self) -> Vec<AttemptId> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl WirelessService for FakeService {
    async fn scan(&self) -> NetResult<Vec<AccessPoint>> {
        self.scan_times.lock().unwrap().push(Instant::now());
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(NetError::ScanFailed("radio busy".into()));
        }
        Ok(self.access_points.lock().unwrap().clone())
    }

    async fn connect(
        &self,
        attempt: AttemptId,
        target: &Target,
        credential: Option<&str>,
    ) -> ConnectOutcome {
        let (respond, rx) = oneshot::channel();
        let request = ConnectRequest {
            attempt,
            ssid: target.ssid.clone(),
            credential: credential.map(String::from),
            respond,
        };
        if self.connects.send(request).is_err() {
            return ConnectOutcome::OtherFailure("test dropped the request channel".into());
        }
        rx.await
            .unwrap_or_else(|_| ConnectOutcome::OtherFailure("request dropped".into()))
    }

    async fn cancel(&self, attempt: AttemptId) -> NetResult<()> {
        self.cancels.lock().unwrap().push(attempt);
        Ok(())
    }

    async fn set_tether_mode(&self, enabled: bool, ssid: &str, password: &str) -> NetResult<()> {
        let (respond, rx) = oneshot::channel();
        let request = TetherRequest {
            enabled,
            ssid: ssid.into(),
            password: password.into(),
            respond,
        };
        self.tethers
            .send(request)
            .map_err(|_| NetError::OtherFailure("test dropped the tether channel".into()))?;
        rx.await
            .unwrap_or_else(|_| Err(NetError::OtherFailure("request dropped".into())))
    }

    async fn ipv4_address(&self) -> Option<String> {
        let on_network = self.access_points.lock().unwrap().iter().any(|ap| ap.active);
        on_network.then(|| "192.168.1.23".to_string())
    }
}

pub fn ap(ssid: &str, bssid: &str, security: SecurityType, strength: u8) -> AccessPoint {
    AccessPoint {
        ssid: ssid.into(),
        bssid: Some(bssid.into()),
        security,
        strength,
        active: false,
    }
}

pub struct Harness {
    pub handle: ControllerHandle,
    pub service: Arc<FakeService>,
    pub store: Arc<MemoryCredentialStore>,
    pub connects: mpsc::UnboundedReceiver<ConnectRequest>,
    pub tethers: mpsc::UnboundedReceiver<TetherRequest>,
    pub snapshots: watch::Receiver<UiSnapshot>,
}

impl Harness {
    pub fn start(aps: Vec<AccessPoint>, store: MemoryCredentialStore) -> Self {
        let (connect_tx, connects) = mpsc::unbounded_channel();
        let (tether_tx, tethers) = mpsc::unbounded_channel();
        let service = Arc::new(FakeService {
            access_points: Mutex::new(aps),
            fail_scans: AtomicBool::new(false),
            scan_times: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            connects: connect_tx,
            tethers: tether_tx,
        });
        let store = Arc::new(store);

        let (handle, _task) = Controller::spawn(
            service.clone(),
            store.clone(),
            ControllerSettings::default(),
        );
        let snapshots = handle.subscribe();

        Self {
            handle,
            service,
            store,
            connects,
            tethers,
            snapshots,
        }
    }

    /// Start visible and wait for the first scan to land
    pub async fn visible(aps: Vec<AccessPoint>, store: MemoryCredentialStore) -> Self {
        let expected = aps.len();
        let mut harness = Self::start(aps, store);
        harness.handle.set_visible(true).unwrap();
        harness
            .wait_for(|s| s.last_scan.is_some() && s.networks.len() == expected)
            .await;
        harness
    }

    /// Wait (in virtual time) until a published snapshot satisfies `pred`
    pub async fn wait_for(&mut self, pred: impl Fn(&UiSnapshot) -> bool) -> UiSnapshot {
        let snapshots = &mut self.snapshots;
        tokio::time::timeout(Duration::from_secs(600), async {
            loop {
                {
                    let current = snapshots.borrow_and_update();
                    if pred(&current) {
                        return current.clone();
                    }
                }
                snapshots.changed().await.expect("controller stopped");
            }
        })
        .await
        .expect("snapshot condition never reached")
    }

    pub async fn next_connect(&mut self) -> ConnectRequest {
        self.connects.recv().await.expect("no connect request")
    }

    pub async fn next_tether(&mut self) -> TetherRequest {
        self.tethers.recv().await.expect("no tether request")
    }

    /// Let the controller drain whatever is queued without reaching any timer
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
