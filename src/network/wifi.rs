use std::collections::HashMap;

use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::error::{NetError, NetResult};
use crate::network::dbus_proxies::*;
use crate::network::types::SecurityType;

/// NMDeviceType for Wi-Fi
const DEVICE_TYPE_WIFI: u32 = 2;

/// NMWepKeyType: hex or ASCII key, as opposed to a passphrase
const WEP_KEY_TYPE_KEY: u32 = 1;

/// Profile id NetworkManager stores the hotspot under
pub const HOTSPOT_CONNECTION_ID: &str = "Hotspot";

/// Wi-Fi lookups over NetworkManager's object tree
pub struct WifiManager<'a> {
    connection: &'a Connection,
}

impl<'a> WifiManager<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Find the Wi-Fi device, optionally pinned to an interface name
    pub async fn find_wifi_device(&self, interface: Option<&str>) -> NetResult<OwnedObjectPath> {
        let nm_proxy = NetworkManagerProxy::new(self.connection).await?;
        let devices = nm_proxy.get_devices().await?;

        for path in devices {
            let dev_proxy = DeviceProxy::builder(self.connection)
                .path(path.clone())?
                .build()
                .await?;

            if dev_proxy.device_type().await.unwrap_or(0) != DEVICE_TYPE_WIFI {
                continue;
            }
            match interface {
                Some(wanted) if dev_proxy.interface().await.unwrap_or_default() != wanted => {}
                _ => return Ok(path),
            }
        }

        Err(NetError::NoWifiDevice)
    }

    /// Object path of the visible AP with this bssid
    pub async fn find_access_point(
        &self,
        device_path: &OwnedObjectPath,
        bssid: &str,
    ) -> NetResult<Option<OwnedObjectPath>> {
        let proxy = WirelessProxy::builder(self.connection)
            .path(device_path.clone())?
            .build()
            .await?;

        for ap_path in proxy.get_all_access_points().await? {
            let ap = AccessPointProxy::builder(self.connection)
                .path(ap_path.clone())?
                .build()
                .await?;
            if ap.hw_address().await.unwrap_or_default().eq_ignore_ascii_case(bssid) {
                return Ok(Some(ap_path));
            }
        }
        Ok(None)
    }

    /// Saved station profile for the given SSID
    pub async fn find_saved_connection_for_ssid(
        &self,
        ssid: &str,
    ) -> NetResult<Option<OwnedObjectPath>> {
        self.find_saved_connection(|settings| {
            let is_station = settings
                .get("802-11-wireless")
                .and_then(|wifi| wifi.get("mode"))
                .and_then(ov_to_string)
                .map_or(true, |mode| mode != "ap");
            let ssid_matches = settings
                .get("802-11-wireless")
                .and_then(|wifi| wifi.get("ssid"))
                .and_then(ov_to_bytes)
                .is_some_and(|bytes| bytes == ssid.as_bytes());
            is_station && ssid_matches
        })
        .await
    }

    /// Saved profile by its connection id
    pub async fn find_connection_by_id(&self, id: &str) -> NetResult<Option<OwnedObjectPath>> {
        self.find_saved_connection(|settings| {
            settings
                .get("connection")
                .and_then(|conn| conn.get("id"))
                .and_then(ov_to_string)
                .is_some_and(|found| found == id)
        })
        .await
    }

    async fn find_saved_connection(
        &self,
        matches: impl Fn(&SettingsMap) -> bool,
    ) -> NetResult<Option<OwnedObjectPath>> {
        let settings_proxy = SettingsProxy::new(self.connection).await?;
        let connections = settings_proxy.list_connections().await?;

        for conn_path in connections {
            let conn_proxy = ConnectionSettingsProxy::builder(self.connection)
                .path(conn_path.clone())?
                .build()
                .await?;

            let Ok(settings) = conn_proxy.get_settings().await else {
                continue;
            };
            let is_wifi = settings
                .get("connection")
                .and_then(|conn| conn.get("type"))
                .and_then(ov_to_string)
                .is_some_and(|t| t == "802-11-wireless");
            if is_wifi && matches(&settings) {
                debug!("Matched saved profile {}", conn_path);
                return Ok(Some(conn_path));
            }
        }

        Ok(None)
    }
}

// ── Settings builders ─────────────────────────────────────────────────

fn owned<'v>(value: impl Into<Value<'v>>) -> NetResult<OwnedValue> {
    OwnedValue::try_from(value.into()).map_err(|e| NetError::Dbus(e.into()))
}

/// Profile for joining `ssid` as a station
pub fn station_settings(
    ssid: &str,
    bssid: Option<&str>,
    security: SecurityType,
    credential: Option<&str>,
) -> NetResult<SettingsMap> {
    let mut connection: SettingsMap = HashMap::new();

    let mut conn_settings = HashMap::new();
    conn_settings.insert("id".into(), owned(ssid)?);
    conn_settings.insert("type".into(), owned("802-11-wireless")?);
    conn_settings.insert("autoconnect".into(), owned(true)?);
    connection.insert("connection".into(), conn_settings);

    let mut wifi_settings = HashMap::new();
    wifi_settings.insert("ssid".into(), owned(ssid.as_bytes().to_vec())?);
    wifi_settings.insert("mode".into(), owned("infrastructure")?);
    if let Some(bssid) = bssid {
        wifi_settings.insert("bssid".into(), owned(bssid)?);
    }

    match security {
        SecurityType::Open => {}
        SecurityType::WpaPsk => {
            let mut sec_settings = HashMap::new();
            sec_settings.insert("key-mgmt".into(), owned("wpa-psk")?);
            if let Some(psk) = credential {
                sec_settings.insert("psk".into(), owned(psk)?);
            }
            connection.insert("802-11-wireless-security".into(), sec_settings);
            wifi_settings.insert("security".into(), owned("802-11-wireless-security")?);
        }
        SecurityType::Wep => {
            let mut sec_settings = HashMap::new();
            sec_settings.insert("key-mgmt".into(), owned("none")?);
            sec_settings.insert("auth-alg".into(), owned("open")?);
            if let Some(key) = credential {
                sec_settings.insert("wep-key0".into(), owned(key)?);
                sec_settings.insert("wep-key-type".into(), owned(WEP_KEY_TYPE_KEY)?);
            }
            connection.insert("802-11-wireless-security".into(), sec_settings);
            wifi_settings.insert("security".into(), owned("802-11-wireless-security")?);
        }
        SecurityType::Enterprise => {
            return Err(NetError::OtherFailure(format!(
                "'{}' uses 802.1X; configure it as a saved profile first",
                ssid
            )));
        }
    }
    connection.insert("802-11-wireless".into(), wifi_settings);

    connection.insert("ipv4".into(), auto_ip()?);
    connection.insert("ipv6".into(), auto_ip()?);
    Ok(connection)
}

/// Access-point profile sharing the device's upstream over IPv4
pub fn hotspot_settings(ssid: &str, password: &str) -> NetResult<SettingsMap> {
    let mut connection: SettingsMap = HashMap::new();

    let mut conn_settings = HashMap::new();
    conn_settings.insert("id".into(), owned(HOTSPOT_CONNECTION_ID)?);
    conn_settings.insert("type".into(), owned("802-11-wireless")?);
    conn_settings.insert("autoconnect".into(), owned(false)?);
    connection.insert("connection".into(), conn_settings);

    let mut wifi_settings = HashMap::new();
    wifi_settings.insert("ssid".into(), owned(ssid.as_bytes().to_vec())?);
    wifi_settings.insert("mode".into(), owned("ap")?);
    wifi_settings.insert("security".into(), owned("802-11-wireless-security")?);
    connection.insert("802-11-wireless".into(), wifi_settings);

    let mut sec_settings = HashMap::new();
    sec_settings.insert("key-mgmt".into(), owned("wpa-psk")?);
    sec_settings.insert("psk".into(), owned(password)?);
    connection.insert("802-11-wireless-security".into(), sec_settings);

    let mut ipv4_settings = HashMap::new();
    ipv4_settings.insert("method".into(), owned("shared")?);
    connection.insert("ipv4".into(), ipv4_settings);

    Ok(connection)
}

fn auto_ip() -> NetResult<HashMap<String, OwnedValue>> {
    let mut settings = HashMap::new();
    settings.insert("method".into(), owned("auto")?);
    Ok(settings)
}

// ── Safe OwnedValue extraction via pattern matching ───────────────────
// OwnedValue derefs to Value<'static>, so &**v gives &Value to match on.

pub fn ov_to_string(v: &OwnedValue) -> Option<String> {
    match &**v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

pub fn ov_to_bytes(v: &OwnedValue) -> Option<Vec<u8>> {
    match &**v {
        Value::Array(arr) => {
            let mut bytes = Vec::new();
            for item in arr.iter() {
                match item {
                    Value::U8(b) => bytes.push(*b),
                    _ => return None,
                }
            }
            Some(bytes)
        }
        _ => None,
    }
}
