use tokio::sync::oneshot;

use crate::error::NetResult;
use crate::network::types::{AccessPoint, AttemptId, ConnectOutcome};

/// Synchronous accept/reject for a request
pub type Reply = oneshot::Sender<NetResult<()>>;

/// Requests from the presentation layer to the controller
#[derive(Debug)]
pub enum Command {
    /// Connect to a catalog network, optionally with a fresh secret
    Connect {
        ssid: String,
        credential: Option<String>,
        reply: Reply,
    },
    /// Abandon whatever attempt is current
    Cancel { reply: Reply },
    /// Drop the saved secret for a network
    Forget { ssid: String, reply: Reply },
    SetTetheringEnabled { enabled: bool, reply: Reply },
    SetTetheringPassword { password: String, reply: Reply },
    /// The owning screen was shown or hidden
    SetVisible(bool),
    /// Scan now, subject to coalescing
    Refresh,
    Shutdown,
}

/// Everything the coordination task reacts to. Service completions are
/// delivered here from the tasks that ran them.
#[derive(Debug)]
pub enum Event {
    Command(Command),
    ScanFinished {
        result: NetResult<Vec<AccessPoint>>,
        ipv4_address: Option<String>,
    },
    ConnectFinished {
        attempt: AttemptId,
        outcome: ConnectOutcome,
    },
    /// The controller's own deadline for an attempt passed
    AttemptTimedOut(AttemptId),
    TetherFinished {
        switch: u64,
        result: NetResult<()>,
    },
}
