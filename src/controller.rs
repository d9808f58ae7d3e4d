//! The coordination context.
//!
//! One tokio task owns the catalog, the connection state machine, the
//! tethering controller and the scheduler. Every call into the wireless
//! service runs on its own spawned task and reports back through the event
//! channel, so all state changes happen serially on this task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::catalog::NetworkCatalog;
use crate::connection::{AttemptState, ConnectCommand, ConnectionStateMachine, FailureReason};
use crate::error::{NetError, NetResult};
use crate::event::{Command, Event, Reply};
use crate::network::service::{CredentialStore, WirelessService};
use crate::network::types::{AttemptId, Target};
use crate::scheduler::{RefreshScheduler, DEFAULT_BASE_INTERVAL, DEFAULT_MAX_INTERVAL};
use crate::snapshot::{Banner, ConnectionView, NetworkRow, TetheringView, UiSnapshot};
use crate::tethering::{TetherSwitch, TetheringController, DEFAULT_MIN_PASSWORD_LEN};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for [`Controller::spawn`]
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub connect_timeout: Duration,
    pub scan_base_interval: Duration,
    pub scan_max_interval: Duration,
    pub tether_ssid: String,
    pub tether_password: String,
    pub tether_min_password_len: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scan_base_interval: DEFAULT_BASE_INTERVAL,
            scan_max_interval: DEFAULT_MAX_INTERVAL,
            tether_ssid: "offroad".into(),
            tether_password: "swordfish".into(),
            tether_min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

pub struct Controller {
    service: Arc<dyn WirelessService>,
    store: Arc<dyn CredentialStore>,
    catalog: NetworkCatalog,
    machine: ConnectionStateMachine,
    tethering: TetheringController,
    scheduler: RefreshScheduler,
    connect_timeout: Duration,
    attempt_timer: Option<JoinHandle<()>>,
    banner: Option<Banner>,
    ipv4_address: Option<String>,
    /// Answers held back until the snapshot they describe is published
    replies: Vec<(Reply, NetResult<()>)>,
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Sender<UiSnapshot>,
}

impl Controller {
    /// Start the coordination task. The screen starts hidden; nothing is
    /// scanned until the handle reports it visible.
    pub fn spawn(
        service: Arc<dyn WirelessService>,
        store: Arc<dyn CredentialStore>,
        settings: ControllerSettings,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(UiSnapshot::default());

        let controller = Self {
            service,
            store,
            catalog: NetworkCatalog::new(),
            machine: ConnectionStateMachine::new(),
            tethering: TetheringController::new(
                settings.tether_ssid,
                settings.tether_password,
                settings.tether_min_password_len,
            ),
            scheduler: RefreshScheduler::new(
                settings.scan_base_interval,
                settings.scan_max_interval,
            ),
            connect_timeout: settings.connect_timeout,
            attempt_timer: None,
            banner: None,
            ipv4_address: None,
            replies: Vec::new(),
            events: events.clone(),
            snapshots,
        };

        let task = tokio::spawn(controller.run(rx));
        let handle = ControllerHandle {
            events,
            snapshots: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        info!("Wi-Fi controller started");
        self.publish();

        loop {
            let due = self.scheduler.next_due();
            tokio::select! {
                event = rx.recv() => match event {
                    None | Some(Event::Command(Command::Shutdown)) => break,
                    Some(event) => self.handle(event),
                },
                _ = sleep_until_due(due) => self.start_scan(),
            }
            self.publish();
            self.flush_replies();
        }

        self.flush_replies();
        self.stop_attempt_timer();
        info!("Wi-Fi controller stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::ScanFinished {
                result,
                ipv4_address,
            } => {
                let ok = result.is_ok();
                self.scheduler.finish(ok, Instant::now());
                if self.tethering.blocks_station_mode() {
                    debug!("Dropping scan that finished after tethering started");
                    self.catalog.freeze();
                    return;
                }
                let known = self.store.known_networks();
                let outcome = self.catalog.apply_scan(result, &known, self.machine.slot());
                match outcome.scan_error {
                    Some(e) => self.banner = Some(Banner::ScanFailed(e.to_string())),
                    None => {
                        if self.banner.as_ref().is_some_and(Banner::is_scan_failure) {
                            self.banner = None;
                        }
                        self.ipv4_address = ipv4_address;
                    }
                }
            }
            Event::ConnectFinished { attempt, outcome } => {
                if self.machine.on_outcome(attempt, outcome, self.store.as_ref()) {
                    self.stop_attempt_timer();
                    self.surface_attempt();
                    self.sync_catalog();
                    // Pick up the new association and address promptly
                    self.start_scan();
                }
            }
            Event::AttemptTimedOut(attempt) => {
                if self.machine.on_timeout(attempt) {
                    self.attempt_timer = None;
                    self.cancel_at_service(attempt);
                    self.surface_attempt();
                    self.sync_catalog();
                }
            }
            Event::TetherFinished { switch, result } => {
                if let Some(Err(e)) = self.tethering.on_result(switch, result) {
                    self.banner = Some(Banner::Tethering(e.to_string()));
                }
                if self.tethering.is_enabled() && self.machine.release_connected() {
                    // The radio is an access point now; the station link is gone
                    self.catalog.clear_association();
                    self.sync_catalog();
                }
                let blocked = self.tethering.blocks_station_mode();
                self.scheduler.set_suspended(blocked, Instant::now());
                if blocked {
                    self.catalog.freeze();
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                ssid,
                credential,
                reply,
            } => {
                let result = self.connect(&ssid, credential);
                self.respond(reply, result);
            }
            Command::Cancel { reply } => {
                if let Some(attempt) = self.machine.cancel() {
                    self.cancel_at_service(attempt);
                }
                self.stop_attempt_timer();
                self.sync_catalog();
                self.respond(reply, Ok(()));
            }
            Command::Forget { ssid, reply } => {
                let result = self.machine.forget(&ssid, self.store.as_ref()).map(|attempt| {
                    if let Some(attempt) = attempt {
                        self.cancel_at_service(attempt);
                        self.stop_attempt_timer();
                    }
                });
                self.sync_catalog();
                self.respond(reply, result);
            }
            Command::SetTetheringEnabled { enabled, reply } => {
                let result = self
                    .tethering
                    .set_enabled(enabled)
                    .map(|switch| self.begin_tether_switch(switch));
                self.respond(reply, result);
            }
            Command::SetTetheringPassword { password, reply } => {
                let result = self
                    .tethering
                    .set_password(password)
                    .map(|switch| self.begin_tether_switch(switch));
                self.respond(reply, result);
            }
            Command::SetVisible(visible) => {
                if self.scheduler.set_visible(visible, Instant::now()) {
                    self.start_scan();
                }
            }
            Command::Refresh => self.start_scan(),
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, ssid: &str, credential: Option<String>) -> NetResult<()> {
        if self.tethering.blocks_station_mode() {
            return Err(NetError::InvalidState(
                "cannot join a network while tethering".into(),
            ));
        }
        let target = self
            .catalog
            .find(ssid)
            .map(Target::from)
            .ok_or_else(|| NetError::UnknownNetwork(ssid.to_string()))?;

        let command = self
            .machine
            .connect(target, credential, self.store.as_ref())?;
        self.banner = None;
        if let Some(command) = command {
            self.dispatch_connect(command);
        }
        self.sync_catalog();
        Ok(())
    }

    fn dispatch_connect(&mut self, command: ConnectCommand) {
        let ConnectCommand {
            attempt,
            target,
            credential,
        } = command;

        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = service
                .connect(attempt, &target, credential.as_deref())
                .await;
            debug!("Service answered {} with {:?}", attempt, outcome);
            let _ = events.send(Event::ConnectFinished { attempt, outcome });
        });

        self.stop_attempt_timer();
        let events = self.events.clone();
        let timeout = self.connect_timeout;
        self.attempt_timer = Some(tokio::spawn(async move {
            sleep(timeout).await;
            let _ = events.send(Event::AttemptTimedOut(attempt));
        }));
    }

    fn begin_tether_switch(&mut self, switch: Option<TetherSwitch>) {
        let Some(switch) = switch else {
            return;
        };

        if switch.enabled {
            if let Some(attempt) = self.machine.force_fail(FailureReason::TetheringEnabled) {
                self.cancel_at_service(attempt);
                self.stop_attempt_timer();
                self.surface_attempt();
                self.sync_catalog();
            }
            self.scheduler.set_suspended(true, Instant::now());
            self.catalog.freeze();
        }

        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service
                .set_tether_mode(switch.enabled, &switch.ssid, &switch.password)
                .await;
            let _ = events.send(Event::TetherFinished {
                switch: switch.id,
                result,
            });
        });
    }

    fn start_scan(&mut self) {
        if !self.scheduler.try_begin(Instant::now()) {
            return;
        }
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service.scan().await;
            let ipv4_address = if result.is_ok() {
                service.ipv4_address().await
            } else {
                None
            };
            let _ = events.send(Event::ScanFinished {
                result,
                ipv4_address,
            });
        });
    }

    fn cancel_at_service(&self, attempt: AttemptId) {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            if let Err(e) = service.cancel(attempt).await {
                // Best-effort; any late answer for this id is discarded anyway
                warn!("Service could not cancel {}: {}", attempt, e);
            }
        });
    }

    fn stop_attempt_timer(&mut self) {
        if let Some(timer) = self.attempt_timer.take() {
            timer.abort();
        }
    }

    /// Raise a banner for a terminal attempt state that needs the user
    fn surface_attempt(&mut self) {
        match self.machine.state() {
            AttemptState::WrongPassword { target } => {
                self.banner = Some(Banner::WrongPassword(target.ssid.clone()));
            }
            AttemptState::Failed { target, reason } => {
                self.banner = Some(Banner::ConnectFailed(format!(
                    "{}: {}",
                    target.ssid, reason
                )));
            }
            _ => {}
        }
    }

    fn sync_catalog(&mut self) {
        self.catalog.rejoin_known(&self.store.known_networks());
        self.catalog.restyle(self.machine.slot());
    }

    fn respond(&mut self, reply: Reply, result: NetResult<()>) {
        if let Err(e) = &result {
            debug!("Request rejected: {}", e);
        }
        self.replies.push((reply, result));
    }

    fn flush_replies(&mut self) {
        for (reply, result) in self.replies.drain(..) {
            // The requester may have stopped waiting
            let _ = reply.send(result);
        }
    }

    fn snapshot(&self) -> UiSnapshot {
        UiSnapshot {
            networks: self.catalog.records().iter().map(NetworkRow::from).collect(),
            connection: ConnectionView::from(self.machine.state()),
            banner: self.banner.clone(),
            tethering: TetheringView::from(&self.tethering),
            stale: self.catalog.is_stale(),
            scanning: self.scheduler.in_flight(),
            last_scan: self.catalog.last_scan(),
            ipv4_address: self.ipv4_address.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}


/// Cloneable front door to the controller task
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Receiver<UiSnapshot>,
}

impl ControllerHandle {
    fn send(&self, command: Command) -> NetResult<()> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| NetError::ControllerStopped)
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> NetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| NetError::ControllerStopped)?
    }

    /// Connect to `ssid` as last seen by the catalog
    pub async fn connect(&self, ssid: impl Into<String>, credential: Option<String>) -> NetResult<()> {
        let ssid = ssid.into();
        self.request(|reply| Command::Connect {
            ssid,
            credential,
            reply,
        })
        .await
    }

    pub async fn cancel(&self) -> NetResult<()> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    pub async fn forget(&self, ssid: impl Into<String>) -> NetResult<()> {
        let ssid = ssid.into();
        self.request(|reply| Command::Forget { ssid, reply }).await
    }

    pub async fn set_tethering_enabled(&self, enabled: bool) -> NetResult<()> {
        self.request(|reply| Command::SetTetheringEnabled { enabled, reply })
            .await
    }

    pub async fn set_tethering_password(&self, password: impl Into<String>) -> NetResult<()> {
        let password = password.into();
        self.request(|reply| Command::SetTetheringPassword { password, reply })
            .await
    }

    pub fn set_visible(&self, visible: bool) -> NetResult<()> {
        self.send(Command::SetVisible(visible))
    }

    pub fn refresh_now(&self) -> NetResult<()> {
        self.send(Command::Refresh)
    }

    pub fn subscribe(&self) -> watch::Receiver<UiSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> UiSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }
}
