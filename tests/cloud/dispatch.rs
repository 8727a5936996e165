//! End-to-end dispatch through the public API.

use cloudtask::util::config::parse_config;
use cloudtask::{
    ConnectionFailure, DispatcherConfig, ManagerState, RateLimits, Task, TaskBuilder, TaskError,
    TaskManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded for {resource}")]
struct QuotaExceeded {
    resource: String,
}

/// A compute client that routes every call through one manager.
struct ComputeClient {
    manager: Arc<TaskManager>,
    calls: Arc<AtomicUsize>,
}

impl ComputeClient {
    fn new(manager: Arc<TaskManager>) -> Self {
        Self {
            manager,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn list_servers(&self) -> Result<Vec<String>, TaskError> {
        let calls = self.calls.clone();
        self.manager.submit_fn("list-servers", Some("compute"), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["web-1".to_string(), "db-1".to_string()])
        })
    }

    fn create_server(
        &self,
        name: &str,
    ) -> Result<String, TaskError> {
        let calls = self.calls.clone();
        let name = name.to_string();
        self.manager.submit_fn("create-server", Some("compute"), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            if name.starts_with("big") {
                return Err(QuotaExceeded {
                    resource: "cores".to_string(),
                }
                .into());
            }
            Ok(format!("{}-id", name))
        })
    }
}

#[test]
fn test_client_calls_are_rate_limited() {
    let config = DispatcherConfig {
        rate_limits: RateLimits::unlimited().with_tag_secs("compute", 0.05),
        ..DispatcherConfig::default()
    };
    let manager = Arc::new(TaskManager::with_config("compute", config));
    manager.start().unwrap();
    let client = ComputeClient::new(manager.clone());

    let start = Instant::now();
    assert_eq!(client.list_servers().unwrap(), ["web-1", "db-1"]);
    assert_eq!(client.create_server("small").unwrap(), "small-id");
    assert_eq!(client.list_servers().unwrap().len(), 2);
    assert!(start.elapsed() >= Duration::from_millis(90));
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);

    manager.stop();
    assert_eq!(manager.state(), ManagerState::Stopped);
}

#[test]
fn test_client_sees_original_error() {
    let manager = Arc::new(TaskManager::new("quota"));
    manager.start().unwrap();
    let client = ComputeClient::new(manager.clone());

    let err = client.create_server("big-box").unwrap_err();
    assert_eq!(err.to_string(), "quota exceeded for cores");
    assert_eq!(err.downcast_ref::<QuotaExceeded>().unwrap().resource, "cores");
    assert!(!err.is_transient());
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    manager.stop();
}

#[test]
fn test_connection_reset_is_retried_transparently() {
    let manager = TaskManager::new("reset");
    manager.start().unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let task = TaskBuilder::new()
        .name("get-image")
        .tag("image")
        .build(move || match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(ConnectionFailure::new("connection reset by peer").into()),
            _ => Ok("ubuntu"),
        });

    assert_eq!(manager.submit(task).unwrap(), "ubuntu");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    manager.stop();
}

#[test]
fn test_many_clients_share_one_manager() {
    let manager = Arc::new(TaskManager::new("shared"));
    manager.start().unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = ComputeClient::new(manager.clone());
            thread::spawn(move || {
                for i in 0..5 {
                    client.create_server(&format!("vm-{}", i)).unwrap();
                }
                client.calls.load(Ordering::SeqCst)
            })
        })
        .collect();

    let total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(total, 20);
    manager.stop();
    assert_eq!(manager.stats().snapshot().tasks_dispatched, 20);
}

#[test]
fn test_manager_from_config() {
    let config = parse_config(
        r#"
        name = "configured"
        workers = 2

        [rate]
        compute = 0.05
        "#,
    )
    .unwrap();
    let manager = config.build_manager();
    manager.start().unwrap();

    let start = Instant::now();
    for _ in 0..2 {
        manager.submit(Task::new(|| Ok(())).with_tag("compute")).unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(45));

    let future = manager
        .submit_async("pooled", None, || Ok(thread::current().name().map(str::to_owned)))
        .unwrap();
    assert_eq!(future.get().unwrap().as_deref(), Some("configured-pool-0"));
    manager.stop();
}

#[test]
fn test_stopped_manager_rejects_work() {
    let manager = TaskManager::new("closed");
    manager.start().unwrap();
    manager.stop();

    assert!(matches!(
        manager.submit_fn("late", None, || Ok(())),
        Err(TaskError::ManagerStopped(_))
    ));
    assert!(matches!(
        manager.submit_async("late", None, || Ok(())),
        Err(TaskError::ManagerStopped(_))
    ));
}
