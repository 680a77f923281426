// Agent - wires the pipeline and runs the tick loop
//
// Registry -> Scheduler -> JobQueue -> ConsumerPool -> executors
//   -> DeliveryCoordinator -> Transport | OfflineStore -> Sender

use super::clock::JobClock;
use super::config::AgentConfig;
use super::connectivity::ConnectivitySignal;
use super::delivery::DeliveryCoordinator;
use super::job_queue::JobQueue;
use super::metric_extractor::MetricExtractor;
use super::plugin_executor::PluginExecutor;
use super::scheduler::{ReconcileSummary, Scheduler};
use super::sender::Sender;
use super::worker::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use super::worker::{ConsumerPool, JobDispatcher, ShutdownToken};
use crate::domain::ActivityId;
use crate::error::Result;
use crate::port::{
    CommandExecutor, ErrorReporter, OfflineStore, PluginRegistry, Registry, TimeProvider, Transport,
};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// External collaborators the agent is built from
pub struct AgentDeps {
    pub registry: Arc<dyn Registry>,
    pub transport: Arc<dyn Transport>,
    pub offline_store: Arc<dyn OfflineStore>,
    pub command_executor: Arc<dyn CommandExecutor>,
    pub plugins: PluginRegistry,
    pub clock: Arc<JobClock>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Asks the agent to re-apply the registry
///
/// Raised when the registry content changed and when the server rejects a
/// result, which means a definition update was missed. Requests made while
/// the agent is busy coalesce into one.
#[derive(Clone, Default)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    pub fn refresh(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub struct Agent {
    config: AgentConfig,
    registry: Arc<dyn Registry>,
    offline_store: Arc<dyn OfflineStore>,
    command_executor: Arc<dyn CommandExecutor>,
    scheduler: Scheduler,
    queue: JobQueue,
    pool: ConsumerPool,
    delivery: Arc<DeliveryCoordinator>,
    metrics: Arc<MetricExtractor>,
    sender: Sender,
    refresh: RefreshHandle,
    shutdown: ShutdownToken,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        deps: AgentDeps,
        connectivity: ConnectivitySignal,
        shutdown: ShutdownToken,
    ) -> Self {
        let scheduler = Scheduler::new(
            &config.whitelist,
            Arc::clone(&deps.offline_store),
            Arc::clone(&deps.time_provider),
            config.tick_period.as_millis() as i64,
            config.min_interval_secs,
        );

        let refresh = RefreshHandle::default();
        let metrics = Arc::new(MetricExtractor::new(config.metric_timeout));
        let sender = Sender::new(
            Arc::clone(&deps.transport),
            Arc::clone(&deps.offline_store),
            connectivity,
            refresh.clone(),
            shutdown.clone(),
            Arc::clone(&deps.reporter),
            &config,
        );

        let delivery = Arc::new(DeliveryCoordinator::new(
            Arc::clone(&deps.transport),
            Arc::clone(&deps.offline_store),
            sender.clone(),
            refresh.clone(),
            Arc::clone(&metrics),
            config.output_read_limit,
        ));

        let plugin_executor = Arc::new(PluginExecutor::new(
            deps.plugins,
            Arc::clone(&deps.clock),
            config.command_timeout,
        ));

        let queue = JobQueue::new(config.job_queue_capacity);
        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::clone(&deps.command_executor),
            plugin_executor,
            Arc::clone(&delivery),
        ));
        let pool = ConsumerPool::new(
            queue.clone(),
            dispatcher,
            Arc::clone(&deps.time_provider),
            Arc::clone(&deps.reporter),
            shutdown.clone(),
            config.max_consumers,
        );

        Self {
            config,
            registry: deps.registry,
            offline_store: deps.offline_store,
            command_executor: deps.command_executor,
            scheduler,
            queue,
            pool,
            delivery,
            metrics,
            sender,
            refresh,
            shutdown,
        }
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.refresh.clone()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Re-read the registry: export env, reconcile activities, resize the pool
    ///
    /// Added or changed activities are scheduled immediately.
    pub async fn apply_registry(&self) -> Result<ReconcileSummary> {
        let env = self.registry.environment_variables().await?;
        self.command_executor.set_env_variables(&env).await;

        let activities = self.registry.activities().await?;
        let ids: Vec<ActivityId> = activities.iter().map(|a| a.id.clone()).collect();
        let summary = self.scheduler.reconcile(activities).await;
        self.metrics.retain_activities(&ids);
        self.pool
            .resize(summary.consumer_count(self.config.max_consumers))
            .await?;

        if summary.changed() > 0 {
            self.schedule().await?;
        }
        Ok(summary)
    }

    /// Enqueue every job due before the next tick
    pub async fn schedule(&self) -> Result<usize> {
        let jobs = self.scheduler.tick();
        let count = jobs.len();
        for job in jobs {
            self.queue.push(job).await?;
        }
        if count > 0 {
            info!(count, "Scheduled activities");
        }
        Ok(count)
    }

    /// Sweep the command executor and deliver what finished
    pub async fn collect(&self) -> usize {
        let finished = self.command_executor.finish_jobs().await;
        let count = finished.len();
        for job in finished {
            self.delivery.complete(job).await;
        }
        count
    }

    /// Tick loop until shutdown, then stop everything in order
    pub async fn run(&self) -> Result<()> {
        info!("Agent started");
        let mut shutdown = self.shutdown.clone();

        // Results left over from a previous run
        self.sender.notify();

        if let Err(e) = self.apply_registry().await {
            error!(error = %e, "Failed to load activities");
        }

        let mut ticker = interval(self.config.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.schedule().await {
                        error!(error = %e, "Failed to schedule activities");
                    }
                    self.collect().await;
                }
                _ = self.refresh.notified() => {
                    info!("Refresh requested, reloading activities");
                    if let Err(e) = self.apply_registry().await {
                        error!(error = %e, "Failed to reload activities");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        self.stop().await;
        info!("Agent stopped");
        Ok(())
    }

    async fn stop(&self) {
        info!("Stopping agent");
        self.pool.join(GRACEFUL_SHUTDOWN_TIMEOUT).await;
        // Finished shell jobs still get a result (delivered or stored)
        self.collect().await;
        self.command_executor.stop().await;
        self.offline_store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::Activity;
    use crate::port::command_executor::mocks::MockCommandExecutor;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;
    use crate::port::offline_store::mocks::InMemoryOfflineStore;
    use crate::port::registry::mocks::StaticRegistry;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::transport::mocks::MockTransport;
    use crate::port::DeliveryStatus;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        agent: Arc<Agent>,
        registry: Arc<StaticRegistry>,
        executor: Arc<MockCommandExecutor>,
        transport: Arc<MockTransport>,
        store: Arc<InMemoryOfflineStore>,
        shutdown: crate::application::worker::ShutdownSender,
    }

    fn fixture(activities: Vec<Activity>, status: DeliveryStatus) -> Fixture {
        let registry = Arc::new(StaticRegistry::new(activities));
        let executor = Arc::new(MockCommandExecutor::new("hi\n", 0));
        let transport = Arc::new(MockTransport::new(status));
        let store = Arc::new(InMemoryOfflineStore::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let (shutdown, token) = shutdown_channel();

        let config = AgentConfig {
            tick_period: Duration::from_millis(50),
            sender_retry_interval: Duration::from_millis(20),
            ..AgentConfig::default()
        };
        let deps = AgentDeps {
            registry: registry.clone(),
            transport: transport.clone(),
            offline_store: store.clone(),
            command_executor: executor.clone(),
            plugins: PluginRegistry::new(),
            clock: Arc::new(JobClock::new(time.clone())),
            time_provider: time,
            reporter: Arc::new(RecordingErrorReporter::new()),
        };

        Fixture {
            agent: Arc::new(Agent::new(config, deps, ConnectivitySignal::default(), token)),
            registry,
            executor,
            transport,
            store,
            shutdown,
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_apply_registry_exports_env_and_schedules() {
        let f = fixture(
            vec![Activity::new("a1", "echo", "echo hi", 60)],
            DeliveryStatus::Success,
        );
        let mut env = BTreeMap::new();
        env.insert("REGION".to_string(), "eu".to_string());
        f.registry.set_env(env.clone());

        let summary = f.agent.apply_registry().await.unwrap();
        assert_eq!(summary.started, 1);
        assert_eq!(f.executor.env_updates(), vec![env]);

        eventually(|| f.executor.added().len() == 1).await;
        assert_eq!(f.agent.collect().await, 1);
        assert_eq!(f.transport.delivered().len(), 1);

        f.shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_run_delivers_and_queues_when_disconnected() {
        let f = fixture(
            vec![Activity::new("a1", "echo", "echo hi", 60)],
            DeliveryStatus::NotConnected,
        );
        let agent = Arc::clone(&f.agent);
        let handle = tokio::spawn(async move { agent.run().await });

        eventually(|| f.store.len() == 1).await;
        assert_eq!(f.store.records()[0].activity, "a1");

        // Server comes back: sender drains the queue
        f.transport.set_default(DeliveryStatus::Success);
        eventually(|| f.store.is_empty()).await;

        f.shutdown.shutdown();
        handle.await.unwrap().unwrap();
        assert!(f.executor.is_stopped());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_activity() {
        let f = fixture(vec![], DeliveryStatus::Success);
        let agent = Arc::clone(&f.agent);
        let handle = tokio::spawn(async move { agent.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(f.executor.added().is_empty());

        f.registry
            .set_activities(vec![Activity::new("a2", "date", "date", 60)]);
        f.agent.refresh_handle().refresh();

        eventually(|| f.executor.added().iter().any(|j| j.activity_id == "a2")).await;

        f.shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }
    #[tokio::test]
    async fn test_conflicting_result_reloads_registry() {
        let f = fixture(
            vec![Activity::new("a1", "echo", "echo hi", 60)],
            DeliveryStatus::Conflict,
        );
        let agent = Arc::clone(&f.agent);
        let handle = tokio::spawn(async move { agent.run().await });

        eventually(|| !f.transport.attempts().is_empty()).await;
        // Startup load plus the reload asked for by the rejected result
        eventually(|| f.executor.env_updates().len() >= 2).await;
        assert!(f.store.is_empty());

        f.shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }
}
