// Sender - drains the offline queue once connectivity allows
//
// Runs only while there is something to send: it exits when a batch comes
// back empty and is restarted by the next `notify`. At most one instance runs.
// A rejected record is dropped and triggers a registry refresh.

use super::agent::RefreshHandle;
use super::config::AgentConfig;
use super::connectivity::ConnectivitySignal;
use super::worker::{spawn_supervised, ShutdownToken};
use crate::domain::OfflineRecord;
use crate::error::Result;
use crate::port::{DeliveryStatus, ErrorReporter, OfflineStore, Transport};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct SenderState {
    running: bool,
    /// Bumped on every notify; an empty batch only ends the loop if nothing arrived meanwhile
    wakeups: u64,
}

struct SenderInner {
    transport: Arc<dyn Transport>,
    offline_store: Arc<dyn OfflineStore>,
    connectivity: ConnectivitySignal,
    refresh: RefreshHandle,
    shutdown: ShutdownToken,
    reporter: Arc<dyn ErrorReporter>,
    batch_size: usize,
    retry_interval: Duration,
    state: Mutex<SenderState>,
}

/// Handle to the sender; clones share one instance
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

impl Sender {
    pub fn new(
        transport: Arc<dyn Transport>,
        offline_store: Arc<dyn OfflineStore>,
        connectivity: ConnectivitySignal,
        refresh: RefreshHandle,
        shutdown: ShutdownToken,
        reporter: Arc<dyn ErrorReporter>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                transport,
                offline_store,
                connectivity,
                refresh,
                shutdown,
                reporter,
                batch_size: config.sender_batch_size.max(1),
                retry_interval: config.sender_retry_interval,
                state: Mutex::new(SenderState::default()),
            }),
        }
    }

    /// Records were enqueued: make sure a sender loop is running
    pub fn notify(&self) {
        let mut state = self.inner.lock_state();
        state.wakeups += 1;
        if state.running || self.inner.shutdown.is_shutdown() {
            return;
        }
        state.running = true;
        drop(state);

        debug!("Starting offline sender");
        let inner = Arc::clone(&self.inner);
        spawn_supervised("offline-sender", Arc::clone(&self.inner.reporter), async move {
            inner.run().await
        });
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }
}

impl SenderInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_stopped(&self) {
        self.lock_state().running = false;
    }

    async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = self.connectivity.wait_connected() => {}
                _ = shutdown.wait() => {
                    self.mark_stopped();
                    return Ok(());
                }
            }

            let seen = self.lock_state().wakeups;
            let records = match self.offline_store.select(self.batch_size).await {
                Ok(records) => records,
                Err(e) => {
                    self.mark_stopped();
                    return Err(e);
                }
            };

            if records.is_empty() {
                let mut state = self.lock_state();
                if state.wakeups == seen {
                    state.running = false;
                    debug!("Offline queue drained, sender stopping");
                    return Ok(());
                }
                continue;
            }

            let (done, interrupted) = self.send_batch(records).await;
            let mut pause = interrupted;
            if !done.is_empty() {
                match self.offline_store.delete(&done, &[]).await {
                    Ok(deleted) => debug!(deleted, "Removed delivered offline records"),
                    Err(e) => {
                        error!(error = %e, "Failed to remove delivered offline records");
                        pause = true;
                    }
                }
            }

            if pause {
                tokio::select! {
                    _ = sleep(self.retry_interval) => {}
                    _ = shutdown.wait() => {
                        self.mark_stopped();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Row ids to remove, and whether the batch was cut short by a connectivity failure
    async fn send_batch(&self, records: Vec<OfflineRecord>) -> (Vec<i64>, bool) {
        let mut done = Vec::with_capacity(records.len());

        for record in records {
            let payload = record.to_payload();
            match self.transport.deliver(&record.activity, &payload).await {
                DeliveryStatus::Success => done.extend(record.row_id),
                DeliveryStatus::Conflict => {
                    warn!(
                        activity_id = %record.activity,
                        timestamp = record.timestamp,
                        "Dropping offline record rejected as conflicting, refreshing activities"
                    );
                    done.extend(record.row_id);
                    self.refresh.refresh();
                }
                status => {
                    info!(status = %status, "Server unavailable, pausing offline sender");
                    return (done, true);
                }
            }
        }
        (done, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::ResultPayload;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;
    use crate::port::offline_store::mocks::InMemoryOfflineStore;
    use crate::port::transport::mocks::MockTransport;
    use tokio_test::{assert_pending, assert_ready, task};

    async fn seed(store: &InMemoryOfflineStore, activity: &str, timestamps: &[i64]) {
        for ts in timestamps {
            let payload = ResultPayload::text(*ts, 0, format!("out {}", ts));
            assert!(store.insert(OfflineRecord::from_payload(activity, &payload).unwrap()).await);
        }
    }

    fn sender(
        transport: &Arc<MockTransport>,
        store: &Arc<InMemoryOfflineStore>,
        connectivity: ConnectivitySignal,
        shutdown: ShutdownToken,
        batch_size: usize,
        retry_ms: u64,
    ) -> (Sender, RefreshHandle) {
        let refresh = RefreshHandle::default();
        let config = AgentConfig {
            sender_batch_size: batch_size,
            sender_retry_interval: Duration::from_millis(retry_ms),
            ..AgentConfig::default()
        };
        let sender = Sender::new(
            transport.clone(),
            store.clone(),
            connectivity,
            refresh.clone(),
            shutdown,
            Arc::new(RecordingErrorReporter::new()),
            &config,
        );
        (sender, refresh)
    }

    async fn wait_until_idle(sender: &Sender) {
        for _ in 0..200 {
            if !sender.is_running() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("sender did not stop");
    }

    #[tokio::test]
    async fn test_drains_in_timestamp_order_then_stops() {
        let transport = Arc::new(MockTransport::new_success());
        let store = Arc::new(InMemoryOfflineStore::new());
        seed(&store, "a1", &[30, 10, 20]).await;
        seed(&store, "a2", &[15]).await;

        let (_tx, token) = shutdown_channel();
        let (sender, _) = sender(&transport, &store, ConnectivitySignal::new(true), token, 2, 10);
        sender.notify();
        wait_until_idle(&sender).await;

        assert!(store.is_empty());
        let order: Vec<i64> = transport
            .delivered()
            .iter()
            .map(|(_, payload)| payload.timestamp)
            .collect();
        assert_eq!(order, vec![10, 15, 20, 30]);
    }

    #[tokio::test]
    async fn test_not_connected_keeps_records_and_retries() {
        let transport = Arc::new(MockTransport::new_success());
        transport.push_status(DeliveryStatus::NotConnected);
        let store = Arc::new(InMemoryOfflineStore::new());
        seed(&store, "a1", &[1, 2]).await;

        let (_tx, token) = shutdown_channel();
        let (sender, _) = sender(&transport, &store, ConnectivitySignal::new(true), token, 10, 20);
        sender.notify();
        wait_until_idle(&sender).await;

        assert!(store.is_empty());
        let attempts = transport.attempts();
        assert_eq!(attempts[0].2, DeliveryStatus::NotConnected);
        assert_eq!(attempts[0].1.timestamp, 1);
        assert_eq!(transport.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_is_dropped_and_requests_refresh() {
        let transport = Arc::new(MockTransport::new(DeliveryStatus::Conflict));
        let store = Arc::new(InMemoryOfflineStore::new());
        seed(&store, "a1", &[1]).await;

        let (_tx, token) = shutdown_channel();
        let (sender, refresh) =
            sender(&transport, &store, ConnectivitySignal::new(true), token, 10, 10);
        let mut refreshed = task::spawn(refresh.notified());
        assert_pending!(refreshed.poll());

        sender.notify();
        wait_until_idle(&sender).await;

        assert!(store.is_empty());
        assert_eq!(transport.attempts().len(), 1);
        assert!(refreshed.is_woken());
        assert_ready!(refreshed.poll());
    }

    #[tokio::test]
    async fn test_waits_for_connectivity() {
        let transport = Arc::new(MockTransport::new_success());
        let store = Arc::new(InMemoryOfflineStore::new());
        seed(&store, "a1", &[1]).await;

        let connectivity = ConnectivitySignal::new(false);
        let (_tx, token) = shutdown_channel();
        let (sender, _) = sender(&transport, &store, connectivity.clone(), token, 10, 10);
        sender.notify();
        sleep(Duration::from_millis(30)).await;
        assert!(sender.is_running());
        assert!(transport.attempts().is_empty());

        connectivity.set_connected(true);
        wait_until_idle(&sender).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_and_blocks_restart() {
        let transport = Arc::new(MockTransport::new_success());
        let store = Arc::new(InMemoryOfflineStore::new());
        seed(&store, "a1", &[1]).await;

        let (tx, token) = shutdown_channel();
        let (sender, _) = sender(&transport, &store, ConnectivitySignal::new(false), token, 10, 10);
        sender.notify();
        tx.shutdown();
        wait_until_idle(&sender).await;

        sender.notify();
        assert!(!sender.is_running());
        assert_eq!(store.len(), 1);
    }
}
