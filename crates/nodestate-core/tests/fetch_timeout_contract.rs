//! Contract Test: Bounded Remote Fetch
//!
//! This test verifies that fetching the remote object is a bounded poll with
//! a heartbeat signal on every failure.
//!
//! Constraints verified:
//! - The first attempt is immediate
//! - Failed attempts are spaced by the fetch interval
//! - The fetch gives up once the timeout has elapsed, carrying the last error
//! - The heartbeat handler fires exactly once per failed attempt
//! - A push whose fetch times out never attempts an update

mod common;

use common::*;
use nodestate_core::StatusWriter;
use nodestate_core::error::Error;
use nodestate_core::traits::{SyncMessage, SyncStatus};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[tokio::test(start_paused = true)]
async fn fetch_times_out_after_budget() {
    let dir = tempfile::tempdir().unwrap();
    let remote = ScriptedRemoteStore::with_node().await;
    remote.set_fail_get(true);
    let heartbeat = CountingHeartbeat::new();

    let config = minimal_config(dir.path());
    let timeout = config.fetch.timeout();
    assert_eq!(timeout, Duration::from_secs(300));

    let (writer, _event_rx) = StatusWriter::new(
        Box::new(CountingDeviceSource::new(interfaces("eth0"))),
        Arc::new(remote.clone()),
        Arc::new(heartbeat.clone()),
        config,
    )
    .expect("writer construction succeeds");

    let start = Instant::now();
    let err = writer
        .fetch_remote_state()
        .await
        .expect_err("fetch should time out");

    assert!(start.elapsed() >= timeout, "fetch gave up early");
    match err {
        Error::FetchTimeout { node, source } => {
            assert_eq!(node, NODE);
            assert!(
                matches!(*source, Error::RemoteStore(_)),
                "timeout should carry the last fetch error: {:?}",
                source
            );
        }
        other => panic!("expected FetchTimeout, got {:?}", other),
    }

    // Attempts at t = 0, 10, ..., 300
    assert_eq!(remote.get_call_count(), 31);
    assert_eq!(
        heartbeat.failure_count(),
        remote.get_call_count(),
        "one heartbeat signal per failed attempt"
    );
}

#[tokio::test(start_paused = true)]
async fn fetch_recovers_before_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let remote = ScriptedRemoteStore::with_node().await;
    remote.set_fail_get(true);
    let heartbeat = CountingHeartbeat::new();

    let (writer, _event_rx) = StatusWriter::new(
        Box::new(CountingDeviceSource::new(interfaces("eth0"))),
        Arc::new(remote.clone()),
        Arc::new(heartbeat.clone()),
        minimal_config(dir.path()),
    )
    .expect("writer construction succeeds");

    let recover = {
        let remote = remote.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            remote.set_fail_get(false);
        })
    };

    let state = writer.fetch_remote_state().await;
    recover.await.unwrap();

    assert!(state.is_ok(), "fetch should recover: {:?}", state);
    // Failures at t = 0, 10, 20; success at t = 30
    assert_eq!(remote.get_call_count(), 4);
    assert_eq!(heartbeat.failure_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn push_with_unreachable_remote_never_updates() {
    let dir = tempfile::tempdir().unwrap();
    let remote = ScriptedRemoteStore::with_node().await;
    remote.set_fail_get(true);

    let mut config = minimal_config(dir.path());
    config.fetch.interval_secs = 1;
    config.fetch.timeout_secs = 2;

    let (writer, _event_rx) = StatusWriter::new(
        Box::new(CountingDeviceSource::new(interfaces("eth0"))),
        Arc::new(remote.clone()),
        Arc::new(CountingHeartbeat::new()),
        config,
    )
    .expect("writer construction succeeds");

    let err = writer
        .push_status(&SyncMessage::new(SyncStatus::Succeeded, ""))
        .await
        .expect_err("push should fail");

    assert!(err.is_timeout(), "push error should wrap the timeout: {:?}", err);
    assert_eq!(remote.update_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_object_is_polled_like_any_failure() {
    let dir = tempfile::tempdir().unwrap();
    let remote = ScriptedRemoteStore::empty();
    let heartbeat = CountingHeartbeat::new();

    let mut config = minimal_config(dir.path());
    config.fetch.interval_secs = 1;
    config.fetch.timeout_secs = 3;

    let (writer, _event_rx) = StatusWriter::new(
        Box::new(CountingDeviceSource::new(Vec::new())),
        Arc::new(remote.clone()),
        Arc::new(heartbeat.clone()),
        config,
    )
    .expect("writer construction succeeds");

    let err = writer.fetch_remote_state().await.expect_err("fetch should time out");

    assert!(err.is_timeout());
    assert_eq!(remote.get_call_count(), 4);
    assert_eq!(heartbeat.failure_count(), 4);
}
