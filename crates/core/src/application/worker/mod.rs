// Worker - consumer pool draining the job queue

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::{execute_guarded, spawn_supervised, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use super::delivery::DeliveryCoordinator;
use super::job_queue::{JobQueue, QueueItem};
use super::plugin_executor::PluginExecutor;
use crate::domain::{ActivityKind, Job};
use crate::error::Result;
use crate::port::{CommandExecutor, ErrorReporter, TaskOutcome, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Routes a due job to the executor for its kind
pub struct JobDispatcher {
    command_executor: Arc<dyn CommandExecutor>,
    plugin_executor: Arc<PluginExecutor>,
    delivery: Arc<DeliveryCoordinator>,
}

impl JobDispatcher {
    pub fn new(
        command_executor: Arc<dyn CommandExecutor>,
        plugin_executor: Arc<PluginExecutor>,
        delivery: Arc<DeliveryCoordinator>,
    ) -> Self {
        Self {
            command_executor,
            plugin_executor,
            delivery,
        }
    }

    /// Shell jobs are handed off and collected later by the executor sweep;
    /// plugin jobs complete inline and go straight to delivery.
    pub async fn dispatch(&self, job: Job) {
        match job.kind {
            ActivityKind::Command => {
                let label = job.to_string();
                if let Err(e) = self.command_executor.add_job(job).await {
                    warn!(job = %label, error = %e, "Failed to start command job");
                }
            }
            ActivityKind::Plugin => {
                let job = self.plugin_executor.execute(job).await;
                self.delivery.complete(job).await;
            }
        }
    }
}

/// One consumer loop
struct Consumer {
    id: usize,
    queue: JobQueue,
    dispatcher: Arc<JobDispatcher>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Consumer {
    async fn run(self, mut shutdown: ShutdownToken) -> Result<()> {
        debug!(consumer = self.id, "Consumer started");
        loop {
            let item = tokio::select! {
                item = self.queue.pop() => item,
                _ = shutdown.wait() => break,
            };

            let job = match item {
                Some(QueueItem::Job(job)) => job,
                Some(QueueItem::Stop) | None => break,
            };

            // Scheduled with lookahead: wait for the due time
            let delay = job.exec_timestamp - self.time_provider.now_millis();
            if delay > 0 {
                tokio::select! {
                    _ = sleep(Duration::from_millis(delay as u64)) => {}
                    _ = shutdown.wait() => break,
                }
            }

            self.dispatcher.dispatch(job).await;
        }
        debug!(consumer = self.id, "Consumer stopped");
        Ok(())
    }
}

struct PoolState {
    count: usize,
    next_id: usize,
    handles: Vec<JoinHandle<TaskOutcome>>,
}

/// Resizable set of consumers
pub struct ConsumerPool {
    queue: JobQueue,
    dispatcher: Arc<JobDispatcher>,
    time_provider: Arc<dyn TimeProvider>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: ShutdownToken,
    max_consumers: usize,
    state: Mutex<PoolState>,
}

impl ConsumerPool {
    pub fn new(
        queue: JobQueue,
        dispatcher: Arc<JobDispatcher>,
        time_provider: Arc<dyn TimeProvider>,
        reporter: Arc<dyn ErrorReporter>,
        shutdown: ShutdownToken,
        max_consumers: usize,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            time_provider,
            reporter,
            shutdown,
            max_consumers,
            state: Mutex::new(PoolState {
                count: 0,
                next_id: 0,
                handles: Vec::new(),
            }),
        }
    }

    /// Start missing consumers or retire excess ones (one stop sentinel each)
    pub async fn resize(&self, wanted: usize) -> Result<()> {
        let wanted = wanted.min(self.max_consumers);
        let mut state = self.state.lock().await;
        state.handles.retain(|handle| !handle.is_finished());

        if wanted > state.count {
            info!(count = wanted - state.count, "Starting job consumers");
            while state.count < wanted {
                state.next_id += 1;
                let consumer = Consumer {
                    id: state.next_id,
                    queue: self.queue.clone(),
                    dispatcher: Arc::clone(&self.dispatcher),
                    time_provider: Arc::clone(&self.time_provider),
                };
                let handle = spawn_supervised(
                    format!("consumer-{}", consumer.id),
                    Arc::clone(&self.reporter),
                    consumer.run(self.shutdown.clone()),
                );
                state.handles.push(handle);
                state.count += 1;
            }
        } else if wanted < state.count {
            info!(count = state.count - wanted, "Stopping job consumers");
            while state.count > wanted {
                self.queue.push_stop().await?;
                state.count -= 1;
            }
        }
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.count
    }

    /// Wait for every consumer to exit after shutdown was signalled
    pub async fn join(&self, timeout: Duration) {
        let handles: Vec<_> = {
            let mut state = self.state.lock().await;
            state.count = 0;
            state.handles.drain(..).collect()
        };

        let all = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!("Consumers did not stop within the shutdown timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::RefreshHandle;
    use crate::application::clock::JobClock;
    use crate::application::config::AgentConfig;
    use crate::application::connectivity::ConnectivitySignal;
    use crate::application::metric_extractor::MetricExtractor;
    use crate::application::sender::Sender;
    use crate::domain::Activity;
    use crate::port::command_executor::mocks::MockCommandExecutor;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;
    use crate::port::offline_store::mocks::InMemoryOfflineStore;
    use crate::port::plugin::mocks::{MockBehavior, MockPlugin};
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::transport::mocks::MockTransport;
    use crate::port::PluginRegistry;

    struct Fixture {
        pool: ConsumerPool,
        queue: JobQueue,
        executor: Arc<MockCommandExecutor>,
        transport: Arc<MockTransport>,
        shutdown: ShutdownSender,
    }

    fn fixture() -> Fixture {
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let reporter: Arc<dyn ErrorReporter> = Arc::new(RecordingErrorReporter::new());
        let (shutdown, token) = shutdown_channel();
        let transport = Arc::new(MockTransport::new_success());
        let store = Arc::new(InMemoryOfflineStore::new());
        let refresh = RefreshHandle::default();
        let sender = Sender::new(
            transport.clone(),
            store.clone(),
            ConnectivitySignal::default(),
            refresh.clone(),
            token.clone(),
            reporter.clone(),
            &AgentConfig::default(),
        );
        let delivery = Arc::new(DeliveryCoordinator::new(
            transport.clone(),
            store,
            sender,
            refresh,
            Arc::new(MetricExtractor::new(Duration::from_secs(1))),
            1024,
        ));

        let mut plugins = PluginRegistry::new();
        plugins.register(Arc::new(MockPlugin::new(
            "sampler",
            MockBehavior::Value(serde_json::json!({"ok": 1})),
        )));
        let plugin_executor = Arc::new(PluginExecutor::new(
            plugins,
            Arc::new(JobClock::new(time.clone())),
            Duration::from_secs(5),
        ));

        let executor = Arc::new(MockCommandExecutor::new("hi", 0));
        let dispatcher = Arc::new(JobDispatcher::new(executor.clone(), plugin_executor, delivery));
        let queue = JobQueue::new(16);
        let pool = ConsumerPool::new(queue.clone(), dispatcher, time, reporter, token, 8);

        Fixture {
            pool,
            queue,
            executor,
            transport,
            shutdown,
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_dispatches_by_kind() {
        let f = fixture();
        f.pool.resize(2).await.unwrap();

        let now = chrono::Utc::now().timestamp_millis();
        f.queue
            .push(Job::new(&Activity::new("c1", "", "echo hi", 60), now, true))
            .await
            .unwrap();
        f.queue
            .push(Job::new(&Activity::plugin("p1", "", "sampler", 60), now, true))
            .await
            .unwrap();

        eventually(|| f.executor.added().len() == 1 && f.transport.delivered().len() == 1).await;
        assert_eq!(f.executor.added()[0].activity_id, "c1");
        assert_eq!(f.transport.delivered()[0].0, "p1");

        f.shutdown.shutdown();
        f.pool.join(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_resize_caps_and_shrinks_with_sentinels() {
        let f = fixture();
        f.pool.resize(20).await.unwrap();
        assert_eq!(f.pool.count().await, 8);

        f.pool.resize(3).await.unwrap();
        assert_eq!(f.pool.count().await, 3);

        // Retired consumers take their sentinels
        eventually(|| f.queue.is_empty()).await;

        f.shutdown.shutdown();
        f.pool.join(Duration::from_secs(1)).await;
        assert_eq!(f.pool.count().await, 0);
    }

    #[tokio::test]
    async fn test_waits_until_job_is_due() {
        let f = fixture();
        f.pool.resize(1).await.unwrap();

        let due = chrono::Utc::now().timestamp_millis() + 150;
        f.queue
            .push(Job::new(&Activity::new("c1", "", "echo hi", 60), due, true))
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert!(f.executor.added().is_empty());

        eventually(|| f.executor.added().len() == 1).await;
        assert!(chrono::Utc::now().timestamp_millis() >= due);

        f.shutdown.shutdown();
        f.pool.join(Duration::from_secs(1)).await;
    }
}
