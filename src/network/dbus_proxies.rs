// D-Bus proxy trait definitions for the NetworkManager interfaces the
// wireless service talks to. zbus's #[proxy] macro generates typed async
// clients from these.

use std::collections::HashMap;
use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

/// Nested settings dict as NetworkManager exchanges it (a{sa{sv}})
pub type SettingsMap = HashMap<String, HashMap<String, OwnedValue>>;

// ── NetworkManager Main Interface ─────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NetworkManager {
    /// Get all network devices
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Activate a saved connection
    fn activate_connection(
        &self,
        connection: &ObjectPath<'_>,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> zbus::Result<OwnedObjectPath>;

    /// Add a connection profile and activate it in one call
    fn add_and_activate_connection(
        &self,
        connection: SettingsMap,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> zbus::Result<(OwnedObjectPath, OwnedObjectPath)>;

    /// Deactivate an active connection
    fn deactivate_connection(&self, active_connection: &ObjectPath<'_>) -> zbus::Result<()>;

    /// Currently active connections
    #[zbus(property)]
    fn active_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

// ── Device Interface ──────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait Device {
    /// Device interface name (e.g., "wlan0")
    #[zbus(property)]
    fn interface(&self) -> zbus::Result<String>;

    /// Device type (2 = Wi-Fi)
    #[zbus(property)]
    fn device_type(&self) -> zbus::Result<u32>;

    /// Current device state
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;

    /// Current state and the reason the device entered it
    #[zbus(property)]
    fn state_reason(&self) -> zbus::Result<(u32, u32)>;

    /// IP4Config object path
    #[zbus(property)]
    fn ip4_config(&self) -> zbus::Result<OwnedObjectPath>;
}

// ── Wireless Device Interface ─────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait Wireless {
    /// Request a Wi-Fi scan
    fn request_scan(&self, options: HashMap<String, OwnedValue>) -> zbus::Result<()>;

    /// Get all visible access points
    fn get_all_access_points(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Active access point ("/" when none)
    #[zbus(property)]
    fn active_access_point(&self) -> zbus::Result<OwnedObjectPath>;
}

// ── Access Point Interface ────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait AccessPoint {
    /// SSID as bytes
    #[zbus(property)]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;

    /// BSSID (MAC address string)
    #[zbus(property)]
    fn hw_address(&self) -> zbus::Result<String>;

    /// Signal strength 0-100
    #[zbus(property)]
    fn strength(&self) -> zbus::Result<u8>;

    /// AP flags (privacy etc.)
    #[zbus(property)]
    fn flags(&self) -> zbus::Result<u32>;

    /// WPA flags
    #[zbus(property)]
    fn wpa_flags(&self) -> zbus::Result<u32>;

    /// RSN (WPA2/WPA3) flags
    #[zbus(property)]
    fn rsn_flags(&self) -> zbus::Result<u32>;
}

// ── IP4Config Interface ───────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.IP4Config",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait IP4Config {
    /// Address data: array of dicts with "address" (string) and "prefix" (u32)
    #[zbus(property)]
    fn address_data(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;
}

// ── Active Connection Interface ───────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Connection.Active",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ActiveConnection {
    /// Human-readable connection ID
    #[zbus(property)]
    fn id(&self) -> zbus::Result<String>;

    /// State of the active connection
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;
}

// ── Settings Interface ────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait Settings {
    /// List all saved connection profiles
    fn list_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

// ── Connection Settings Interface ─────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ConnectionSettings {
    /// Get all settings for this connection
    fn get_settings(&self) -> zbus::Result<SettingsMap>;

    /// Replace this connection's settings
    fn update(&self, properties: SettingsMap) -> zbus::Result<()>;

    /// Delete this connection
    fn delete(&self) -> zbus::Result<()>;
}
