use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::broker::{DeliveryEngine, RetentionPolicy};
use crate::client::RelayClient;
use crate::persistence::DurableLog;
use crate::transport::serve;
use crate::utils::error::ClientError;

const WAIT: Duration = Duration::from_secs(2);

async fn start(engine: DeliveryEngine) -> (String, Arc<DeliveryEngine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let engine = Arc::new(engine);
    tokio::spawn(serve(listener, engine.clone()));
    (url, engine)
}

async fn start_volatile() -> (String, Arc<DeliveryEngine>) {
    start(DeliveryEngine::volatile(
        RetentionPolicy::default(),
        Duration::from_millis(50),
    ))
    .await
}

#[tokio::test]
async fn test_submit_then_pull_pending() {
    let (url, _engine) = start_volatile().await;
    let mut client = RelayClient::connect(&url).await.unwrap();

    let first = client.submit("user1", "user2", "hello", None).await.unwrap();
    let second = client.submit("user2", "user1", "hey", Some(first + 10)).await.unwrap();
    assert!(first > 0);
    assert_eq!(second, first + 10);

    let mut recipients = client.recipients().await.unwrap();
    recipients.sort();
    assert_eq!(recipients, vec!["user1", "user2"]);

    let pending = tokio::time::timeout(WAIT, client.get_messages())
        .await
        .unwrap()
        .unwrap();
    let bodies: Vec<_> = pending.iter().map(|m| m.body()).collect();
    assert_eq!(bodies, vec!["hello", "hey"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_list_users_and_rejections() {
    let (url, _engine) = start_volatile().await;
    let mut client = RelayClient::connect(&url).await.unwrap();

    let users = client.list_users().await.unwrap();
    let logins: Vec<_> = users.iter().map(|u| u.login.as_str()).collect();
    assert_eq!(logins, vec!["user1", "user2"]);

    let err = client.submit("user1", "", "nowhere", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Server(_)));

    // the connection stays usable after an error reply
    assert!(client.submit("user1", "user2", "ok", None).await.is_ok());
}

#[tokio::test]
async fn test_subscription_receives_live_messages() {
    let (url, _engine) = start_volatile().await;
    let subscriber = RelayClient::connect(&url).await.unwrap();
    let mut stream = subscriber.subscribe("user2", 0).await.unwrap();

    let mut producer = RelayClient::connect(&url).await.unwrap();
    producer.submit("user1", "user2", "one", None).await.unwrap();
    producer.submit("user1", "user3", "elsewhere", None).await.unwrap();
    producer.submit("user1", "user2", "two", None).await.unwrap();

    let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.body(), "one");
    assert_eq!(second.body(), "two");
    assert_eq!(second.to_user(), "user2");

    // user3's record was left for someone else
    assert_eq!(producer.recipients().await.unwrap(), vec!["user3"]);
}

#[tokio::test]
async fn test_durable_subscription_replays_from_watermark() {
    let dir = TempDir::new().unwrap();
    let log = DurableLog::open(dir.path().join("db")).unwrap();
    let (url, _engine) = start(DeliveryEngine::durable(log, Duration::from_millis(50))).await;

    let mut producer = RelayClient::connect(&url).await.unwrap();
    for ts in [100, 200, 300] {
        producer
            .submit("user1", "user2", &format!("m{ts}"), Some(ts))
            .await
            .unwrap();
    }

    let subscriber = RelayClient::connect(&url).await.unwrap();
    let mut stream = subscriber.subscribe("user2", 100).await.unwrap();
    let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.timestamp(), 200);
    assert_eq!(second.timestamp(), 300);

    let live = producer.submit("user1", "user2", "live", None).await.unwrap();
    let third = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(third.timestamp(), live);
    assert_eq!(third.body(), "live");

    // pulling the shared queue is a volatile-only operation
    let err = producer.get_messages().await.unwrap_err();
    assert!(matches!(err, ClientError::Server(_)));
}

#[tokio::test]
async fn test_pending_pull_from_departed_client_keeps_messages() {
    let (url, _engine) = start_volatile().await;

    let waiting = RelayClient::connect(&url).await.unwrap();
    let pull = tokio::spawn(async move {
        let mut waiting = waiting;
        // nothing is queued yet, so this blocks until the client goes away
        let _ = tokio::time::timeout(Duration::from_millis(100), waiting.get_messages()).await;
        let _ = waiting.close().await;
    });
    pull.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut producer = RelayClient::connect(&url).await.unwrap();
    producer.submit("user1", "user2", "still here", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pending = tokio::time::timeout(WAIT, producer.get_messages())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body(), "still here");
}

#[tokio::test]
async fn test_closed_subscription_leaves_messages_queued() {
    let (url, engine) = start_volatile().await;

    let subscriber = RelayClient::connect(&url).await.unwrap();
    let stream = subscriber.subscribe("user2", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut producer = RelayClient::connect(&url).await.unwrap();
    producer.submit("user1", "user2", "undelivered", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pending = engine.drain_all_timeout(WAIT).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body(), "undelivered");
}
