// Connectivity signal - set by the session layer, awaited by the sender

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_replace(connected);
    }

    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is set
    pub async fn wait_connected(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_wait_pending_until_connected() {
        let signal = ConnectivitySignal::new(false);
        let mut wait = task::spawn(signal.wait_connected());
        assert_pending!(wait.poll());

        signal.set_connected(true);
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_connected_signal_resolves_immediately() {
        let signal = ConnectivitySignal::default();
        assert!(signal.is_connected());
        assert_ready!(task::spawn(signal.wait_connected()).poll());
    }
}
