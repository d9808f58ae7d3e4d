use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::error::{NetError, NetResult};
use crate::network::dbus_proxies::*;
use crate::network::service::WirelessService;
use crate::network::types::{AccessPoint, AttemptId, ConnectOutcome, SecurityType, Target};
use crate::network::wifi::{
    hotspot_settings, ov_to_string, station_settings, WifiManager, HOTSPOT_CONNECTION_ID,
};

/// NMActiveConnectionState
mod active_state {
    pub const ACTIVATED: u32 = 2;
    pub const DEACTIVATING: u32 = 3;
    pub const DEACTIVATED: u32 = 4;
}

/// NMDeviceState / NMDeviceStateReason values used to classify failures
mod device_state {
    pub const NEED_AUTH: u32 = 60;
    pub const REASON_NO_SECRETS: u32 = 7;
    pub const REASON_SUPPLICANT_DISCONNECT: u32 = 8;
    pub const REASON_SUPPLICANT_TIMEOUT: u32 = 11;
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on waiting for NetworkManager, past the controller's own
/// deadline, so the polling task always ends
const ACTIVATION_WAIT: Duration = Duration::from_secs(45);

/// Cancels remembered for attempts NM has not answered yet
const MAX_PENDING_CANCELS: usize = 32;

fn root_path() -> OwnedObjectPath {
    ObjectPath::from_static_str_unchecked("/").into()
}

/// Which attempts own which active connection, and which were cancelled
/// before NM handed one back
#[derive(Debug, Default)]
struct AttemptBook {
    active: HashMap<AttemptId, OwnedObjectPath>,
    cancelled: BTreeSet<AttemptId>,
}

impl AttemptBook {
    fn is_cancelled(&self, attempt: AttemptId) -> bool {
        self.cancelled.contains(&attempt)
    }

    /// Record the active connection for `attempt`. Returns false if the
    /// attempt was cancelled meanwhile; the caller must tear it down.
    fn register(&mut self, attempt: AttemptId, active: OwnedObjectPath) -> bool {
        if self.cancelled.remove(&attempt) {
            return false;
        }
        self.active.insert(attempt, active);
        true
    }

    /// The active connection to deactivate, if NM already created one.
    /// Otherwise the cancel is remembered for `register`.
    fn cancel(&mut self, attempt: AttemptId) -> Option<OwnedObjectPath> {
        if let Some(active) = self.active.remove(&attempt) {
            return Some(active);
        }
        self.cancelled.insert(attempt);
        while self.cancelled.len() > MAX_PENDING_CANCELS {
            self.cancelled.pop_first();
        }
        None
    }

    fn finish(&mut self, attempt: AttemptId) {
        self.active.remove(&attempt);
        self.cancelled.remove(&attempt);
    }
}

/// `WirelessService` backed by NetworkManager on the system bus
pub struct NmWirelessService {
    connection: Connection,
    interface: Option<String>,
    attempts: Mutex<AttemptBook>,
}

impl NmWirelessService {
    /// Connect to the system D-Bus. `interface` pins the Wi-Fi device
    /// (e.g. "wlan0"); `None` takes the first one found.
    pub async fn new(interface: Option<String>) -> NetResult<Self> {
        let connection = Connection::system().await?;
        Ok(Self {
            connection,
            interface,
            attempts: Mutex::new(AttemptBook::default()),
        })
    }

    fn wifi(&self) -> WifiManager<'_> {
        WifiManager::new(&self.connection)
    }

    async fn device(&self) -> NetResult<OwnedObjectPath> {
        self.wifi().find_wifi_device(self.interface.as_deref()).await
    }

    fn book(&self) -> MutexGuard<'_, AttemptBook> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn deactivate(&self, active: &OwnedObjectPath) -> NetResult<()> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        nm_proxy.deactivate_connection(&active.as_ref()).await?;
        Ok(())
    }

    async fn list_access_points(&self) -> NetResult<Vec<AccessPoint>> {
        let device_path = self.device().await?;
        let proxy = WirelessProxy::builder(&self.connection)
            .path(device_path.clone())?
            .build()
            .await?;

        if let Err(e) = proxy.request_scan(HashMap::new()).await {
            // NM refuses back-to-back scans; the cached list is still valid
            debug!("Scan request on {} refused: {}", device_path, e);
        }

        let active_ap = proxy
            .active_access_point()
            .await
            .ok()
            .filter(|p| p.as_str() != "/");

        let mut access_points = Vec::new();
        for ap_path in proxy.get_all_access_points().await? {
            match self.read_access_point(&ap_path, active_ap.as_ref()).await {
                Ok(ap) => access_points.push(ap),
                Err(e) => debug!("Failed to read AP {}: {}", ap_path, e),
            }
        }
        debug!("Scan returned {} AP(s)", access_points.len());
        Ok(access_points)
    }

    async fn read_access_point(
        &self,
        path: &OwnedObjectPath,
        active_ap: Option<&OwnedObjectPath>,
    ) -> NetResult<AccessPoint> {
        let proxy = AccessPointProxy::builder(&self.connection)
            .path(path.clone())?
            .build()
            .await?;

        let ssid = String::from_utf8_lossy(&proxy.ssid().await?).to_string();
        let bssid = proxy.hw_address().await.ok().filter(|b| !b.is_empty());
        let flags = proxy.flags().await.unwrap_or(0);
        let wpa_flags = proxy.wpa_flags().await.unwrap_or(0);
        let rsn_flags = proxy.rsn_flags().await.unwrap_or(0);

        Ok(AccessPoint {
            ssid,
            bssid,
            security: SecurityType::from_flags(flags, wpa_flags, rsn_flags),
            strength: proxy.strength().await.unwrap_or(0),
            active: active_ap == Some(path),
        })
    }

    /// Start activating `target`; returns the active-connection path
    async fn activate(
        &self,
        target: &Target,
        credential: Option<&str>,
    ) -> NetResult<(OwnedObjectPath, OwnedObjectPath)> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let wifi = self.wifi();
        let device_path = self.device().await?;

        let ap_path = match target.bssid.as_deref() {
            Some(bssid) => wifi
                .find_access_point(&device_path, bssid)
                .await?
                .unwrap_or_else(root_path),
            None => root_path(),
        };

        let saved = wifi.find_saved_connection_for_ssid(&target.ssid).await?;
        let active = match (saved, credential) {
            (Some(profile), None) => {
                debug!("Activating saved profile {} for '{}'", profile, target.ssid);
                nm_proxy
                    .activate_connection(&profile.as_ref(), &device_path.as_ref(), &ap_path.as_ref())
                    .await?
            }
            (saved, credential) => {
                // A new secret replaces whatever profile NM had
                if let Some(profile) = saved {
                    let proxy = ConnectionSettingsProxy::builder(&self.connection)
                        .path(profile)?
                        .build()
                        .await?;
                    proxy.delete().await?;
                }
                let settings = station_settings(
                    &target.ssid,
                    target.bssid.as_deref(),
                    target.security,
                    credential,
                )?;
                let (_settings_path, active) = nm_proxy
                    .add_and_activate_connection(settings, &device_path.as_ref(), &ap_path.as_ref())
                    .await?;
                active
            }
        };
        Ok((device_path, active))
    }

    /// Poll the active connection until NM settles it
    async fn wait_for_activation(
        &self,
        device_path: &OwnedObjectPath,
        active_path: &OwnedObjectPath,
    ) -> ConnectOutcome {
        let wait = async {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                let (dev_state, reason) = self.device_state_reason(device_path).await;
                if dev_state == device_state::NEED_AUTH
                    && reason == device_state::REASON_SUPPLICANT_DISCONNECT
                {
                    return ConnectOutcome::AuthenticationRejected;
                }

                let state = match ActiveConnectionProxy::builder(&self.connection)
                    .path(active_path.clone())
                {
                    Ok(builder) => match builder.build().await {
                        Ok(proxy) => proxy.state().await.ok(),
                        Err(_) => None,
                    },
                    Err(_) => None,
                };

                match state {
                    Some(active_state::ACTIVATED) => return ConnectOutcome::Success,
                    Some(active_state::DEACTIVATING) | Some(active_state::DEACTIVATED) | None => {
                        // The object vanishes once NM gives up; the device
                        // keeps the reason
                        return classify_failure(self.device_state_reason(device_path).await.1);
                    }
                    Some(_) => {}
                }
            }
        };

        tokio::time::timeout(ACTIVATION_WAIT, wait)
            .await
            .unwrap_or(ConnectOutcome::Timeout)
    }

    async fn device_state_reason(&self, device_path: &OwnedObjectPath) -> (u32, u32) {
        let proxy = match DeviceProxy::builder(&self.connection).path(device_path.clone()) {
            Ok(builder) => match builder.build().await {
                Ok(proxy) => proxy,
                Err(_) => return (0, 0),
            },
            Err(_) => return (0, 0),
        };
        proxy.state_reason().await.unwrap_or((0, 0))
    }

    async fn find_active_by_id(&self, id: &str) -> NetResult<Option<OwnedObjectPath>> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        for path in nm_proxy.active_connections().await? {
            let proxy = ActiveConnectionProxy::builder(&self.connection)
                .path(path.clone())?
                .build()
                .await?;
            if proxy.id().await.unwrap_or_default() == id {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    async fn enable_hotspot(&self, ssid: &str, password: &str) -> NetResult<()> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let device_path = self.device().await?;
        let settings = hotspot_settings(ssid, password)?;

        let active = match self.wifi().find_connection_by_id(HOTSPOT_CONNECTION_ID).await? {
            Some(profile) => {
                let proxy = ConnectionSettingsProxy::builder(&self.connection)
                    .path(profile.clone())?
                    .build()
                    .await?;
                proxy.update(settings).await.map_err(hotspot_error)?;
                nm_proxy
                    .activate_connection(&profile.as_ref(), &device_path.as_ref(), &root_path().as_ref())
                    .await
                    .map_err(hotspot_error)?
            }
            None => {
                nm_proxy
                    .add_and_activate_connection(settings, &device_path.as_ref(), &root_path().as_ref())
                    .await
                    .map_err(hotspot_error)?
                    .1
            }
        };

        self.wait_for_activation(&device_path, &active)
            .await
            .into_result()
            .map_err(|e| match e {
                NetError::AuthenticationRejected => {
                    NetError::InvalidCredential("hotspot password rejected".into())
                }
                other => other,
            })?;
        info!("Hotspot '{}' is up", ssid);
        Ok(())
    }

    async fn disable_hotspot(&self) -> NetResult<()> {
        match self.find_active_by_id(HOTSPOT_CONNECTION_ID).await? {
            Some(active) => {
                let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
                nm_proxy.deactivate_connection(&active.as_ref()).await?;
                info!("Hotspot stopped");
            }
            None => debug!("Hotspot was not active"),
        }
        Ok(())
    }
}

#[async_trait]
impl WirelessService for NmWirelessService {
    async fn scan(&self) -> NetResult<Vec<AccessPoint>> {
        self.list_access_points()
            .await
            .map_err(|e| NetError::ScanFailed(e.to_string()))
    }

    async fn connect(
        &self,
        attempt: AttemptId,
        target: &Target,
        credential: Option<&str>,
    ) -> ConnectOutcome {
        if self.book().is_cancelled(attempt) {
            self.book().finish(attempt);
            return ConnectOutcome::OtherFailure("cancelled".into());
        }

        let (device_path, active_path) = match self.activate(target, credential).await {
            Ok(paths) => paths,
            Err(e) => {
                self.book().finish(attempt);
                warn!("Activation of '{}' failed ({}): {}", target.ssid, attempt, e);
                return ConnectOutcome::OtherFailure(e.to_string());
            }
        };

        let registered = self.book().register(attempt, active_path.clone());
        if !registered {
            info!(
                "{} was cancelled while '{}' was being set up; deactivating {}",
                attempt, target.ssid, active_path
            );
            if let Err(e) = self.deactivate(&active_path).await {
                warn!("Failed to deactivate {}: {}", active_path, e);
            }
            return ConnectOutcome::OtherFailure("cancelled".into());
        }
        info!(
            "Activating '{}' as {} ({})",
            target.ssid, active_path, attempt
        );

        let outcome = self.wait_for_activation(&device_path, &active_path).await;
        self.book().finish(attempt);
        outcome
    }

    async fn cancel(&self, attempt: AttemptId) -> NetResult<()> {
        let active = self.book().cancel(attempt);
        let Some(active) = active else {
            debug!("{} has no active connection yet; cancel recorded", attempt);
            return Ok(());
        };
        self.deactivate(&active).await?;
        info!("Deactivated {} for cancelled {}", active, attempt);
        Ok(())
    }

    async fn set_tether_mode(&self, enabled: bool, ssid: &str, password: &str) -> NetResult<()> {
        if enabled {
            self.enable_hotspot(ssid, password).await
        } else {
            self.disable_hotspot().await
        }
    }

    async fn ipv4_address(&self) -> Option<String> {
        let device_path = self.device().await.ok()?;
        let dev_proxy = DeviceProxy::builder(&self.connection)
            .path(device_path)
            .ok()?
            .build()
            .await
            .ok()?;
        let ip4_path = dev_proxy.ip4_config().await.ok().filter(|p| p.as_str() != "/")?;
        let ip4_proxy = IP4ConfigProxy::builder(&self.connection)
            .path(ip4_path)
            .ok()?
            .build()
            .await
            .ok()?;
        ip4_proxy.address_data().await.ok().and_then(|addrs| {
            addrs
                .first()
                .and_then(|a| a.get("address").and_then(ov_to_string))
        })
    }
}

fn classify_failure(reason: u32) -> ConnectOutcome {
    match reason {
        device_state::REASON_NO_SECRETS | device_state::REASON_SUPPLICANT_DISCONNECT => {
            ConnectOutcome::AuthenticationRejected
        }
        device_state::REASON_SUPPLICANT_TIMEOUT => ConnectOutcome::Timeout,
        other => ConnectOutcome::OtherFailure(format!("device state reason {}", other)),
    }
}

/// NetworkManager validates the psk when the profile is written
fn hotspot_error(e: zbus::Error) -> NetError {
    let message = e.to_string();
    if message.contains("psk") {
        NetError::InvalidCredential(message)
    } else {
        NetError::Dbus(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(n: u32) -> OwnedObjectPath {
        ObjectPath::try_from(format!("/org/freedesktop/NetworkManager/ActiveConnection/{n}"))
            .unwrap()
            .into()
    }

    #[test]
    fn cancel_before_activation_is_not_lost() {
        let mut book = AttemptBook::default();

        assert_eq!(book.cancel(AttemptId(1)), None);
        assert!(book.is_cancelled(AttemptId(1)));
        assert!(!book.register(AttemptId(1), active(1)));
        assert_eq!(book.cancel(AttemptId(1)), None);
        book.finish(AttemptId(1));
        assert!(!book.is_cancelled(AttemptId(1)));
    }

    #[test]
    fn cancel_after_activation_hands_back_the_connection() {
        let mut book = AttemptBook::default();

        assert!(book.register(AttemptId(2), active(7)));
        assert_eq!(book.cancel(AttemptId(2)), Some(active(7)));
        assert!(!book.is_cancelled(AttemptId(2)));
    }

    #[test]
    fn remembered_cancels_are_bounded() {
        let mut book = AttemptBook::default();
        for id in 0..(MAX_PENDING_CANCELS as u64 + 10) {
            book.cancel(AttemptId(id));
        }
        assert_eq!(book.cancelled.len(), MAX_PENDING_CANCELS);
        assert!(!book.is_cancelled(AttemptId(0)));
        assert!(book.is_cancelled(AttemptId(MAX_PENDING_CANCELS as u64 + 9)));
    }

    #[test]
    fn secrets_failures_are_wrong_password() {
        assert_eq!(classify_failure(7), ConnectOutcome::AuthenticationRejected);
        assert_eq!(classify_failure(8), ConnectOutcome::AuthenticationRejected);
        assert_eq!(classify_failure(11), ConnectOutcome::Timeout);
        assert!(matches!(
            classify_failure(36),
            ConnectOutcome::OtherFailure(_)
        ));
    }
}
