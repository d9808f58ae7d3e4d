//! Wi-Fi catalog, connection and tethering controller.
//!
//! [`Controller::spawn`] starts the coordination task and hands back a
//! [`ControllerHandle`]; the presentation layer reads [`UiSnapshot`]s from
//! it and sends commands through it. The radio stack sits behind
//! [`WirelessService`] ([`NmWirelessService`] talks to NetworkManager) and
//! saved secrets behind [`CredentialStore`].

pub mod catalog;
pub mod connection;
pub mod controller;
pub mod error;
pub mod event;
pub mod network;
pub mod scheduler;
pub mod snapshot;
pub mod tethering;

pub use catalog::{NetworkCatalog, RefreshOutcome};
pub use connection::{AttemptState, ConnectionStateMachine, FailureReason};
pub use controller::{Controller, ControllerHandle, ControllerSettings};
pub use error::{NetError, NetResult};
pub use network::{
    AccessPoint, AttemptId, ConnectOutcome, ConnectionState, CredentialStore,
    FileCredentialStore, MemoryCredentialStore, NetworkRecord, NmWirelessService, SecurityType,
    SignalBars, Target, WirelessService,
};
pub use scheduler::RefreshScheduler;
pub use snapshot::{Banner, ConnectionView, NetworkRow, TetheringView, UiSnapshot};
pub use tethering::TetheringController;
