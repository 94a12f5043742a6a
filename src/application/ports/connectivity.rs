use tokio::sync::watch;

/// Host platform's online/offline primitive. The current value is the platform's view right
/// now; every change is published on the channel.
pub trait ConnectivitySignal: Send + Sync {
    fn watch(&self) -> watch::Receiver<bool>;

    fn is_online(&self) -> bool {
        *self.watch().borrow()
    }
}
