//! End-to-end transfers between a transmitter and a receiver running as
//! separate tokio tasks, joined by an in-memory relay that can lose or
//! corrupt frames.

mod common;

use std::time::Duration;

use common::*;
use rflink::{FailureReason, Metadata, Receiver, TransferEvent, Transmitter};
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::test]
async fn clean_link_delivers_in_one_round() {
    let data = payload(1000);
    let (tx_end, rx_end, relay) = perfect_link(128);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut tx = Transmitter::new(tx_end, tx_config(128, 12, 40));
    let result = tx.send(&data, Metadata::new()).await.expect("send");

    assert!(result.success);
    assert_eq!(result.reason, None);
    assert_eq!(result.chunks_total, 9);
    assert_eq!(result.chunks_received, 9);
    assert_eq!(result.rounds, 1);
    assert_eq!(result.loss_percent, 0.0);
    assert_eq!(result.crc_fail_count, 0);
    assert!(result.effective_throughput > 0.0);

    let received = receiver.await.unwrap().expect("session");
    assert!(received.success);
    assert_eq!(received.run_id, result.run_id);
    assert_eq!(received.data, data);
    assert_eq!(received.bytes, 1000);

    drop(tx);
    relay.await.unwrap();
}

#[tokio::test]
async fn dropped_frames_are_retransmitted() {
    // mtu 32 carries 18 bytes per frame: 1800 bytes make 100 chunks
    let data = payload(1800);
    let (tx_end, rx_end, _relay) = lossy_link(32, |index, _| index % 5 != 4);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut tx = Transmitter::new(tx_end, tx_config(32, 10, 40));
    let result = tx.send(&data, Metadata::new()).await.expect("send");

    assert!(result.success, "{:?}", result);
    assert_eq!(result.chunks_total, 100);
    assert_eq!(result.chunks_received, 100);
    assert!(result.rounds > 1);
    assert!(result.timeouts >= 1);
    assert_eq!(result.loss_percent, 0.0);

    let received = receiver.await.unwrap().expect("session");
    assert_eq!(received.data, data);
}

#[tokio::test]
async fn exhausted_rounds_abort_the_transfer() {
    let data = payload(1800);
    let (tx_end, rx_end, _relay) = lossy_link(32, |index, _| index % 2 == 0);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut tx = Transmitter::new(tx_end, tx_config(32, 100, 1));
    let result = tx.send(&data, Metadata::new()).await.expect("send");

    assert!(!result.success);
    assert!(result.aborted);
    assert_eq!(result.reason, Some(FailureReason::Aborted));
    assert_eq!(result.rounds, 1);
    assert_eq!(result.chunks_received, 50);
    assert!((result.loss_percent - 50.0).abs() < 1e-9);

    let received = receiver.await.unwrap().expect("session");
    assert!(!received.success);
    assert_eq!(received.chunks_received, 50);
    assert_eq!(received.chunks_expected, 100);
}

#[tokio::test]
async fn corrupted_frames_count_as_crc_failures() {
    let data = payload(1000);
    let (tx_end, rx_end, _relay) = lossy_link(128, |index, frame| {
        if index == 2 || index == 7 {
            frame[20] ^= 0x40;
        }
        true
    });

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut tx = Transmitter::new(tx_end, tx_config(128, 12, 40));
    let result = tx.send(&data, Metadata::new()).await.expect("send");

    assert!(result.success);
    assert_eq!(result.crc_fail_count, 2);
    assert_eq!(result.rounds, 2);
    assert!(result.crc_failure_percent() > 0.0);

    let received = receiver.await.unwrap().expect("session");
    assert_eq!(received.crc_fail_count, 2);
    assert_eq!(received.data, data);
}

#[tokio::test]
async fn empty_payload_completes_without_frames() {
    let (tx_end, rx_end, _relay) = lossy_link(64, |_, _| panic!("no frame expected"));

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut tx = Transmitter::new(tx_end, tx_config(64, 12, 40));
    let result = tx.send(b"", Metadata::new()).await.expect("send");

    assert!(result.success);
    assert_eq!(result.chunks_total, 0);
    assert_eq!(result.rounds, 0);
    assert_eq!(result.loss_percent, 0.0);

    let received = receiver.await.unwrap().expect("session");
    assert!(received.success);
    assert!(received.data.is_empty());
}

#[tokio::test]
async fn metadata_and_text_round_trip() {
    let (tx_end, rx_end, _relay) = perfect_link(64);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut meta = Metadata::new();
    meta.insert("name".into(), json!("notes.txt"));
    meta.insert("attempt".into(), json!(3));

    let mut tx = Transmitter::new(tx_end, tx_config(64, 4, 40));
    let result = tx.send_text("héllo over the air", meta.clone()).await.expect("send");
    assert!(result.success);

    let received = receiver.await.unwrap().expect("session");
    assert_eq!(received.metadata, meta);
    assert_eq!(received.text(), "héllo over the air");
}

#[tokio::test]
async fn back_to_back_sessions_share_one_link() {
    let (tx_end, rx_end, _relay) = perfect_link(48);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        let first = rx.receive_text_once(SYNC_WAIT).await.expect("first");
        let second = rx.receive_text_once(SYNC_WAIT).await.expect("second");
        (first, second)
    });

    let mut tx = Transmitter::new(tx_end, tx_config(48, 3, 40));
    let a = tx.send_text("first message", Metadata::new()).await.expect("send a");
    tx.config_mut().window_size = 1;
    let b = tx
        .send_text("second, longer message that needs several frames", Metadata::new())
        .await
        .expect("send b");
    assert!(a.success && b.success);
    assert_eq!(b.rounds as usize, b.chunks_total);

    let (first, second) = receiver.await.unwrap();
    assert_eq!(first.as_deref(), Some("first message"));
    assert_eq!(
        second.as_deref(),
        Some("second, longer message that needs several frames")
    );
}

#[tokio::test]
async fn paced_frames_respect_gap() {
    let data = payload(200);
    let (tx_end, rx_end, _relay) = perfect_link(64);

    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config());
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let mut config = tx_config(64, 12, 40);
    config.gap_ms = 20;
    let mut tx = Transmitter::new(tx_end, config);
    let result = tx.send(&data, Metadata::new()).await.expect("send");

    // 200 bytes at 50 per frame: four gaps of 20ms
    assert_eq!(result.chunks_total, 4);
    assert!(result.duration_s >= Duration::from_millis(80).as_secs_f64());
    assert!(receiver.await.unwrap().expect("session").success);
}

#[tokio::test]
async fn both_ends_publish_progress() {
    let (tx_end, rx_end, _relay) = perfect_link(64);

    let (rx_events, mut rx_log) = mpsc::unbounded_channel();
    let receiver = tokio::spawn(async move {
        let mut rx = Receiver::new(rx_end, rx_config()).with_events(rx_events);
        rx.receive_once(SYNC_WAIT).await.expect("receive")
    });

    let (tx_events, mut tx_log) = mpsc::unbounded_channel();
    let mut tx = Transmitter::new(tx_end, tx_config(64, 12, 40)).with_events(tx_events);
    let result = tx.send(&payload(200), Metadata::new()).await.expect("send");
    assert!(result.success);
    assert!(receiver.await.unwrap().expect("session").success);

    let run_id = result.run_id;
    let mut sent = Vec::new();
    while let Ok(event) = tx_log.try_recv() {
        sent.push(event);
    }
    assert_eq!(sent.len(), 3, "{:?}", sent);
    assert_eq!(sent[0], TransferEvent::SyncSent { run_id, mtu: 64, chunks: 4, total_size: 200 });
    assert!(matches!(
        sent[1],
        TransferEvent::Report { round: 1, pending: 0, missing: 0, .. }
    ));
    assert!(matches!(
        sent[2],
        TransferEvent::Finished { success: true, chunks_received: 4, chunks_expected: 4, .. }
    ));

    let mut seen = Vec::new();
    while let Some(event) = rx_log.recv().await {
        seen.push(event);
    }
    assert_eq!(seen.len(), 3, "{:?}", seen);
    assert_eq!(seen[0], TransferEvent::SyncReceived { run_id, mtu: 64, chunks: 4, total_size: 200 });
    assert!(matches!(
        seen[1],
        TransferEvent::Report { round: 1, pending: 0, missing: 0, .. }
    ));
    assert!(matches!(seen[2], TransferEvent::Finished { success: true, .. }));
}
