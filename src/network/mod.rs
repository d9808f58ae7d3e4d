pub mod dbus_proxies;
pub mod manager;
pub mod service;
pub mod store;
pub mod types;
pub mod wifi;

pub use manager::NmWirelessService;
pub use service::{CredentialStore, WirelessService};
pub use store::{FileCredentialStore, MemoryCredentialStore};
pub use types::*;
