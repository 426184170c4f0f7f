//! End-to-end lifecycle over a real broker node.
//!
//! Each test binds a broker node on `127.0.0.1:0`, connects producer, status
//! reader and workers to it through an `http://` connection string, and drives
//! tasks from submission to a terminal record.

use distributed_tasks::broker::BrokerQueue;
use distributed_tasks::broker::connection::ConnectionInfo;
use distributed_tasks::broker::handlers::broker_router;
use distributed_tasks::broker::memory::MemoryBroker;
use distributed_tasks::broker::remote::HttpBroker;
use distributed_tasks::config::{BrokerSettings, RetryPolicy, WorkerSettings};
use distributed_tasks::executor::tasks::builtin_registry;
use distributed_tasks::executor::types::{FailureKind, TaskState};
use distributed_tasks::{
    Backend, BrokerError, Error, Producer, StatusReader, TaskExecutor, TaskId, TaskRecord, connect,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CREDENTIAL: &str = "s3cret";

async fn spawn_broker_node(visibility_timeout: Duration) -> (SocketAddr, Arc<MemoryBroker>) {
    let broker = Arc::new(MemoryBroker::with_visibility_timeout(visibility_timeout));
    let app = broker_router(broker.clone(), Some(CREDENTIAL.to_string()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, broker)
}

fn settings(addr: SocketAddr, credential: &str, visibility_timeout: Duration) -> BrokerSettings {
    BrokerSettings {
        broker_url: format!("http://:{}@{}", credential, addr),
        result_url: None,
        retry: RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(40),
            request_timeout: Duration::from_secs(2),
        },
        visibility_timeout,
        ..BrokerSettings::default()
    }
}

fn start_workers(backend: &Backend, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let executor = TaskExecutor::new(
        backend.store.clone(),
        backend.queue.clone(),
        builtin_registry(),
        WorkerSettings {
            concurrency: 2,
            name: Some("it-worker".to_string()),
            poll_wait: Duration::from_millis(200),
            error_backoff: Duration::from_millis(50),
        },
    );
    executor.start(shutdown.clone())
}

async fn wait(status: &StatusReader, task_id: &TaskId) -> TaskRecord {
    status
        .wait_for_terminal(task_id, Duration::from_millis(20), Duration::from_secs(10))
        .await
        .unwrap()
}

async fn stop(shutdown: CancellationToken, workers: Vec<JoinHandle<()>>) {
    shutdown.cancel();
    for handle in workers {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker loop should stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_scenarios_over_broker_node() {
    let visibility = Duration::from_secs(5);
    let (addr, node) = spawn_broker_node(visibility).await;
    let backend = connect(&settings(addr, CREDENTIAL, visibility)).await.unwrap();

    let producer = Producer::new(backend.store.clone(), backend.queue.clone());
    let status = StatusReader::new(backend.store.clone());
    let shutdown = CancellationToken::new();
    let workers = start_workers(&backend, &shutdown);

    // Scenario A: divide(10, 2)
    let a = producer.submit("divide", vec![json!(10), json!(2)]).await.unwrap();
    // Scenario B: divide(10, 0)
    let b = producer.submit("divide", vec![json!(10), json!(0)]).await.unwrap();
    // Scenario C: no handler registered
    let c = producer.submit("unregistered_task", vec![json!(1), json!(2)]).await.unwrap();

    let record = wait(&status, &a).await;
    assert_eq!(record.state(), TaskState::Success);
    assert_eq!(record.result(), Some(&json!(5)));
    assert_eq!(record.attempts, 1);

    let record = wait(&status, &b).await;
    assert_eq!(record.state(), TaskState::Failure);
    assert_eq!(record.error().unwrap().kind, FailureKind::Arithmetic);

    let record = wait(&status, &c).await;
    assert_eq!(record.state(), TaskState::Failure);
    assert_eq!(record.error().unwrap().kind, FailureKind::UnknownTask);

    // Terminal records are stable across reads.
    assert_eq!(status.status(&a).await.unwrap(), status.status(&a).await.unwrap());

    stop(shutdown, workers).await;

    let stats = node.stats().await;
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failure, 2);

    // The node reports the same numbers over HTTP.
    let info = ConnectionInfo::parse(&format!("http://:{}@{}", CREDENTIAL, addr)).unwrap();
    let client = HttpBroker::new(&info, RetryPolicy::default(), visibility);
    assert_eq!(client.stats().await.unwrap(), stats);
}

#[tokio::test]
async fn test_abandoned_delivery_is_redelivered() {
    let visibility = Duration::from_millis(300);
    let (addr, _node) = spawn_broker_node(visibility).await;
    let backend = connect(&settings(addr, CREDENTIAL, visibility)).await.unwrap();

    let producer = Producer::new(backend.store.clone(), backend.queue.clone());
    let status = StatusReader::new(backend.store.clone());

    let task_id = producer.submit("add", vec![json!(2), json!(3)]).await.unwrap();

    // A consumer takes the envelope and disappears without acking.
    let abandoned = backend
        .queue
        .consume(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("delivery");
    assert_eq!(abandoned.envelope.id, task_id);

    let shutdown = CancellationToken::new();
    let workers = start_workers(&backend, &shutdown);

    let record = wait(&status, &task_id).await;
    assert_eq!(record.result(), Some(&json!(5)));

    stop(shutdown, workers).await;
}

#[tokio::test]
async fn test_long_task_keeps_its_lease() {
    let visibility = Duration::from_millis(300);
    let (addr, node) = spawn_broker_node(visibility).await;
    let backend = connect(&settings(addr, CREDENTIAL, visibility)).await.unwrap();

    let producer = Producer::new(backend.store.clone(), backend.queue.clone());
    let status = StatusReader::new(backend.store.clone());
    let shutdown = CancellationToken::new();
    let workers = start_workers(&backend, &shutdown);

    let task_id = producer.submit("sleep", vec![json!(1.0)]).await.unwrap();

    let record = wait(&status, &task_id).await;
    assert_eq!(record.state(), TaskState::Success);
    assert_eq!(record.attempts, 1, "a renewed lease must not be redelivered");

    stop(shutdown, workers).await;
    assert_eq!(node.stats().await.in_flight, 0);
}

#[tokio::test]
async fn test_wrong_credential_is_rejected() {
    let visibility = Duration::from_secs(5);
    let (addr, node) = spawn_broker_node(visibility).await;
    let backend = connect(&settings(addr, "wrong", visibility)).await.unwrap();

    let producer = Producer::new(backend.store.clone(), backend.queue.clone());
    let err = producer.submit("divide", vec![json!(1), json!(1)]).await.unwrap_err();

    assert!(matches!(err, Error::Broker(BrokerError::Unauthorized)));
    assert_eq!(node.record_count(), 0);

    let info = ConnectionInfo::parse(&format!("http://:wrong@{}", addr)).unwrap();
    let client = HttpBroker::new(&info, RetryPolicy::default(), visibility);
    assert!(matches!(client.stats().await, Err(BrokerError::Unauthorized)));
}

#[tokio::test]
async fn test_unreachable_broker_is_unavailable() {
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let backend = connect(&settings(addr, CREDENTIAL, Duration::from_secs(5)))
        .await
        .unwrap();

    let status = StatusReader::new(backend.store.clone());
    let err = status.status(&TaskId::new()).await.unwrap_err();

    match err {
        Error::Broker(e) => assert!(e.is_transient(), "unexpected error: {e}"),
        other => panic!("expected a broker error, got {other:?}"),
    }
}
