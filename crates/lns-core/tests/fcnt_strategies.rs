//! Frame-counter strategy and batched persistence tests.

use std::sync::Arc;

use lns_core::device::DeviceRecord;
use lns_core::fcnt::{FrameCounterUpdater, FCNT_PERSIST_DELTA};
use lns_protocol::{DevAddr, DevEui, GatewayId};
use lns_testkit::{init_tracing, key, InMemoryDirectory, RecordingClient};
use pretty_assertions::assert_eq;

const EUI: DevEui = DevEui([0x0D; 8]);
const ADDR: DevAddr = DevAddr(0x2600_0002);

fn gateway() -> GatewayId {
    GatewayId::new("gw-1")
}

fn device(client: Arc<RecordingClient>, single_gateway: bool) -> Arc<DeviceRecord> {
    let mut record = DeviceRecord::new(EUI, ADDR, key(0xAA), key(0xBB), client);
    if single_gateway {
        record = record.with_gateway_affinity(gateway());
    }
    Arc::new(record)
}

fn harness() -> (Arc<InMemoryDirectory>, FrameCounterUpdater) {
    init_tracing();
    let directory = Arc::new(InMemoryDirectory::new());
    let updater = FrameCounterUpdater::new(Arc::clone(&directory) as _, gateway());
    (directory, updater)
}

#[tokio::test]
async fn single_gateway_advances_locally_without_backend() {
    let (directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(client, true);

    for expected in 1..=3 {
        let next = updater.next_fcnt_down(&device, expected).await.expect("next");
        assert_eq!(next, expected);
    }
    assert_eq!(directory.next_fcnt_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn multi_gateway_concurrent_calls_yield_distinct_increasing_values() {
    let (directory, updater) = harness();
    let updater = Arc::new(updater);
    let client = Arc::new(RecordingClient::new());
    let device = device(client, false);

    let mut handles = Vec::new();
    for fcnt in 0..16u32 {
        let updater = Arc::clone(&updater);
        let device = Arc::clone(&device);
        handles.push(tokio::spawn(async move {
            updater.next_fcnt_down(&device, fcnt).await
        }));
    }
    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.expect("task").expect("next"));
    }

    let mut deduped = values.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 16, "duplicate counter values: {values:?}");
    assert_eq!(directory.next_fcnt_calls(), 16);
    assert_eq!(device.fcnt_down().value(), *deduped.last().expect("max"));
}

#[tokio::test]
async fn below_threshold_deltas_defer_persistence() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    device.fcnt_up().advance_to(FCNT_PERSIST_DELTA - 1);
    device.fcnt_down().increment();
    assert!(!updater.save_changes(&device).await.expect("save"));
    assert!(client.reported_writes().is_empty());
    assert!(device.fcnt_up().is_dirty());
}

#[tokio::test]
async fn clean_counters_save_is_a_noop() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    assert!(!updater.save_changes(&device).await.expect("save"));
    assert!(client.reported_writes().is_empty());
}

#[tokio::test]
async fn up_counter_threshold_flushes_both_counters() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    device.fcnt_up().advance_to(FCNT_PERSIST_DELTA);
    device.fcnt_down().increment();
    assert!(updater.save_changes(&device).await.expect("save"));

    let writes = client.reported_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0]["FCntUp"], FCNT_PERSIST_DELTA);
    assert_eq!(writes[0]["FCntDown"], 1);
    assert!(!device.fcnt_up().is_dirty());
    assert!(!device.fcnt_down().is_dirty());
}

#[tokio::test]
async fn down_counter_threshold_alone_triggers_a_flush() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    for _ in 0..FCNT_PERSIST_DELTA {
        device.fcnt_down().increment();
    }
    assert!(updater.save_changes(&device).await.expect("save"));
    assert_eq!(client.reported_writes().len(), 1);
}

#[tokio::test]
async fn refused_twin_write_keeps_state_dirty() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    client.set_refuse_reported(true);
    let device = device(Arc::clone(&client), true);

    device.fcnt_up().advance_to(FCNT_PERSIST_DELTA);
    assert!(!updater.save_changes(&device).await.expect("save"));
    assert!(device.fcnt_up().is_dirty());
}

#[tokio::test]
async fn reset_at_committed_baseline_writes_nothing() {
    let (directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    updater.reset(&device, 0).await.expect("reset");
    assert!(directory.resets().is_empty());
    assert!(client.reported_writes().is_empty());
}

#[tokio::test]
async fn reset_off_baseline_writes_through_and_commits() {
    let (directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = Arc::new(
        DeviceRecord::new(EUI, ADDR, key(0xAA), key(0xBB), Arc::clone(&client) as _)
            .with_counters(120, 40)
            .with_gateway_affinity(gateway()),
    );

    updater.reset(&device, 0).await.expect("reset");
    assert_eq!(directory.resets(), vec![(EUI, 0)]);
    assert_eq!(client.reported_writes().len(), 1);
    assert_eq!(device.fcnt_up().committed(), 0);
    assert_eq!(device.fcnt_down().committed(), 0);
    assert!(!device.fcnt_up().is_dirty());
}

#[tokio::test]
async fn processing_gateway_rides_along_with_a_counter_flush() {
    let (_directory, updater) = harness();
    let client = Arc::new(RecordingClient::new());
    let device = device(Arc::clone(&client), true);

    device.record_processing_gateway(&gateway());
    device.fcnt_up().advance_to(FCNT_PERSIST_DELTA);
    assert!(updater.save_changes(&device).await.expect("save"));

    let writes = client.reported_writes();
    assert_eq!(writes[0]["PreferredGateway"], "gw-1");
    assert!(!device.processing_gateway_dirty());
}
