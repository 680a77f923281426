//! Agent delivering over real HTTP into a SQLite offline queue

use outpost_core::application::{
    shutdown_channel, Agent, AgentConfig, AgentDeps, ConnectivitySignal, JobClock,
};
use outpost_core::domain::Activity;
use outpost_core::port::command_executor::mocks::MockCommandExecutor;
use outpost_core::port::error_reporter::mocks::RecordingErrorReporter;
use outpost_core::port::plugin::mocks::{MockBehavior, MockPlugin};
use outpost_core::port::registry::mocks::StaticRegistry;
use outpost_core::port::{OfflineStore, PluginRegistry, SystemTimeProvider, TimeProvider};
use outpost_infra_http::HttpTransport;
use outpost_infra_sqlite::{database_url, SqliteOfflineStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Collector stand-in answering every request with the current status line
struct Collector {
    base_url: String,
    status: Arc<Mutex<&'static str>>,
    requests: Arc<AtomicUsize>,
}

impl Collector {
    async fn start(status: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let status = Arc::new(Mutex::new(status));
        let requests = Arc::new(AtomicUsize::new(0));

        let (shared_status, counter) = (Arc::clone(&status), Arc::clone(&requests));
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let status = *shared_status.lock().unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(respond(socket, status));
            }
        });

        Self {
            base_url,
            status,
            requests,
        }
    }

    fn set_status(&self, status: &'static str) {
        *self.status.lock().unwrap() = status;
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn respond(mut socket: TcpStream, status: &'static str) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let Ok(n) = socket.read(&mut buf).await else { return };
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let length = text
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= header_end + 4 + length {
                break;
            }
        }
    }
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        status
    );
    let _ = socket.write_all(response.as_bytes()).await;
}

async fn queued(store: &SqliteOfflineStore) -> usize {
    store.select(10).await.map(|rows| rows.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_unauthorized_result_queued_until_accepted() {
    let collector = Collector::start("401 Unauthorized").await;
    let dir = TempDir::new().unwrap();

    let store = Arc::new(
        SqliteOfflineStore::open(&database_url(&dir.path().join("offline.db")))
            .await
            .unwrap(),
    );
    let transport = Arc::new(
        HttpTransport::new(collector.base_url.clone(), Duration::from_secs(2)).unwrap(),
    );

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(MockPlugin::new(
        "load",
        MockBehavior::Value(json!({"load1": 0.5})),
    )));
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let deps = AgentDeps {
        registry: Arc::new(StaticRegistry::new(vec![Activity::plugin("p1", "load", "load", 3600)])),
        transport,
        offline_store: store.clone(),
        command_executor: Arc::new(MockCommandExecutor::new("", 0)),
        plugins,
        clock: Arc::new(JobClock::new(Arc::clone(&time))),
        time_provider: time,
        reporter: Arc::new(RecordingErrorReporter::new()),
    };
    let config = AgentConfig {
        tick_period: Duration::from_millis(50),
        sender_retry_interval: Duration::from_millis(50),
        ..AgentConfig::default()
    };

    let (shutdown, token) = shutdown_channel();
    let agent = Arc::new(Agent::new(config, deps, ConnectivitySignal::default(), token));
    let runner = Arc::clone(&agent);
    let handle = tokio::spawn(async move { runner.run().await });

    let mut stored = false;
    for _ in 0..200 {
        if queued(&store).await == 1 {
            stored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(stored, "rejected result was not queued");

    // Credentials fixed server side: the sender drains the queue
    collector.set_status("200 OK");
    let mut drained = false;
    for _ in 0..200 {
        if queued(&store).await == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(drained, "queued result was never accepted");
    assert!(collector.requests() >= 2);

    shutdown.shutdown();
    handle.await.unwrap().unwrap();
}
