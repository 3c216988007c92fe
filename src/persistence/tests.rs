use super::DurableLog;
use crate::broker::directory::{StaticDirectory, UserDirectory};
use crate::broker::message::{MessageRecord, User};
use crate::broker::store::{MessageStore, ReplayableLogStore};
use crate::broker::{DeliveryEngine, SessionState};
use crate::utils::error::StoreError;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn temp_log() -> (TempDir, DurableLog) {
    let dir = TempDir::new().unwrap();
    let log = DurableLog::open(dir.path().join("db")).unwrap();
    (dir, log)
}

fn in_memory_db() -> sled::Db {
    sled::Config::new().temporary(true).open().unwrap()
}

#[test]
fn test_query_since_is_exclusive() {
    let (_dir, log) = temp_log();
    log.append(MessageRecord::new("user1", "user2", "hi", 100)).unwrap();
    log.append(MessageRecord::new("user3", "user2", "yo", 105)).unwrap();

    let newer = log.query_since("user2", 100).unwrap();
    assert_eq!(newer, vec![MessageRecord::new("user3", "user2", "yo", 105)]);
    assert_eq!(log.query_since("user2", 0).unwrap().len(), 2);
    assert!(log.query_since("user2", 105).unwrap().is_empty());
}

#[test]
fn test_query_since_is_repeatable() {
    let (_dir, log) = temp_log();
    for ts in [30, 10, 20] {
        log.append(MessageRecord::new("a", "user2", "m", ts)).unwrap();
    }
    let first = log.query_since("user2", 0).unwrap();
    let second = log.query_since("user2", 0).unwrap();
    assert_eq!(first, second);
    let stamps: Vec<i64> = first.iter().map(MessageRecord::timestamp).collect();
    assert_eq!(stamps, vec![10, 20, 30]);
}

#[test]
fn test_query_since_ignores_prefix_neighbours() {
    let (_dir, log) = temp_log();
    log.append(MessageRecord::new("x", "a", "for a", 1)).unwrap();
    log.append(MessageRecord::new("x", "a.b", "for a.b", 2)).unwrap();

    let for_a = log.query_since("a", 0).unwrap();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0].body(), "for a");
    assert_eq!(log.query_since("a.b", 0).unwrap().len(), 1);
}

#[test]
fn test_corrupt_entry_is_skipped() {
    let db = in_memory_db();
    let log = DurableLog::from_db(db.clone());
    log.append(MessageRecord::new("a", "user2", "good", 10)).unwrap();
    db.insert(b"message.user2.00000000000000000005", b"not json".to_vec())
        .unwrap();

    let records = log.query_since("user2", 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].body(), "good");
}

#[test]
fn test_same_timestamp_overwrites() {
    let (_dir, log) = temp_log();
    log.append(MessageRecord::new("a", "user2", "first", 7)).unwrap();
    log.append(MessageRecord::new("a", "user2", "second", 7)).unwrap();

    let records = log.query_since("user2", 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].body(), "second");
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let log = DurableLog::open(&path).unwrap();
        log.append(MessageRecord::new("user1", "user2", "persisted", 42)).unwrap();
        log.close().unwrap();
    }
    let log = DurableLog::open(&path).unwrap();
    let records = log.query_since("user2", 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].body(), "persisted");
}

#[test]
fn test_closed_log_is_unavailable() {
    let (_dir, log) = temp_log();
    log.append(MessageRecord::new("a", "b", "m", 1)).unwrap();
    log.close().unwrap();
    // second close is a no-op
    log.close().unwrap();

    let err = log.query_since("b", 0).unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_permanent());
    assert!(matches!(
        log.append(MessageRecord::new("a", "b", "m", 2)),
        Err(StoreError::Unavailable(_))
    ));
    assert!(log.list_users().is_err());
}

#[test]
fn test_recipients_with_activity() {
    let (_dir, log) = temp_log();
    assert!(log.recipients_with_activity().unwrap().is_empty());
    log.append(MessageRecord::new("a", "user2", "m", 1)).unwrap();
    log.append(MessageRecord::new("a", "user2", "m", 2)).unwrap();
    log.append(MessageRecord::new("a", "user9", "m", 3)).unwrap();
    assert_eq!(
        log.recipients_with_activity().unwrap(),
        BTreeSet::from(["user2".to_string(), "user9".to_string()])
    );
}

#[test]
fn test_user_save_get_and_seed() {
    let (_dir, log) = temp_log();
    assert!(log.get_user("user1").unwrap().is_none());

    log.save_user(&User::new("user1", "Renamed")).unwrap();
    log.seed_users(&StaticDirectory::default()).unwrap();

    // seeding keeps the stored entry
    assert_eq!(log.get_user("user1").unwrap().unwrap().full_name, "Renamed");
    assert_eq!(log.get_user("user2").unwrap().unwrap().full_name, "Johnny Depp");
    assert_eq!(log.list_users().unwrap().len(), 2);
}

#[test]
fn test_users_do_not_leak_into_recipients() {
    let (_dir, log) = temp_log();
    log.seed_users(&StaticDirectory::default()).unwrap();
    assert!(log.recipients_with_activity().unwrap().is_empty());
}

#[tokio::test]
async fn test_durable_engine_replays_and_tails() {
    let (_dir, log) = temp_log();
    log.seed_users(&StaticDirectory::default()).unwrap();
    let engine = Arc::new(DeliveryEngine::durable(log, Duration::from_millis(50)));
    assert_eq!(engine.backend().name(), "durable");
    assert_eq!(engine.list_users().unwrap()[0].login, "user1");

    engine.submit(MessageRecord::new("user1", "user2", "old", 100)).unwrap();

    let mut session = engine.open_subscription("user2", 0).unwrap();
    let replayed = session.poll().await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(session.state(), SessionState::Tailing);

    // a second session replays the same history independently
    let mut other = engine.open_subscription("user2", 0).unwrap();
    assert_eq!(other.poll().await.unwrap(), replayed);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(session.run(tx));
    tokio::time::sleep(Duration::from_millis(25)).await;
    let live = engine
        .submit(MessageRecord::unstamped("user1", "user2", "live"))
        .unwrap();

    let got = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, live);

    engine.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_session_ends_when_log_closes() {
    let db = in_memory_db();
    let log = Arc::new(DurableLog::from_db(db));
    let engine = DeliveryEngine::new(
        crate::broker::Backend::Log(log.clone()),
        log.clone(),
        Duration::from_millis(10),
    );
    let session = engine.open_subscription("user2", 0).unwrap();
    log.close().unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let outcome = tokio::time::timeout(Duration::from_secs(1), session.run(tx))
        .await
        .unwrap();
    assert!(matches!(outcome, Err(StoreError::Unavailable(_))));
}
