use crate::application::ports::connectivity::ConnectivitySignal;
use tokio::sync::watch;

/// Connectivity signal driven by the embedding application, e.g. from the host platform's
/// online/offline callbacks, or by tests.
#[derive(Debug)]
pub struct ManualConnectivitySignal {
    sender: watch::Sender<bool>,
}

impl ManualConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    pub fn set_online(&self, online: bool) {
        self.sender.send_replace(online);
    }
}

impl Default for ManualConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for ManualConnectivitySignal {
    fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
