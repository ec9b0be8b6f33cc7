//! Integration tests for the heartbeat timer.
//!
//! Uses paused Tokio time: `sleep_until` resolves as soon as the runtime
//! auto-advances the clock, so intervals of minutes run instantly.

use std::time::Duration;

use rogueport_heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent};
use tokio::time::Instant;

const INTERVAL: Duration = Duration::from_secs(60);

fn heartbeat() -> Heartbeat {
    Heartbeat::new(HeartbeatConfig::with_interval(INTERVAL))
}

/// Timers resolve on the millisecond tick at or after their deadline.
fn assert_fired_after(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(1),
        "fired after {elapsed:?}, expected {expected:?}"
    );
}

// =========================================================================
// HeartbeatConfig
// =========================================================================

#[test]
fn test_default_interval_is_ten_minutes() {
    assert_eq!(HeartbeatConfig::default().interval, Duration::from_secs(600));
    assert!(HeartbeatConfig::disabled().is_disabled());
}

// =========================================================================
// Ping and timeout
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_first_ping_is_immediate() {
    let mut hb = heartbeat();
    let start = Instant::now();

    assert_eq!(hb.wait().await, HeartbeatEvent::SendPing);
    assert_fired_after(start, Duration::ZERO);
    assert!(hb.is_awaiting_pong());
    assert_eq!(hb.pings_sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_unanswered_ping_times_out_after_one_interval() {
    let mut hb = heartbeat();
    hb.wait().await;
    let sent = Instant::now();

    assert_eq!(hb.wait().await, HeartbeatEvent::TimedOut);
    assert_fired_after(sent, INTERVAL);
    assert!(!hb.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_wait_after_timeout_pends_forever() {
    let mut hb = heartbeat();
    hb.wait().await;
    hb.wait().await;

    let result = tokio::time::timeout(INTERVAL * 10, hb.wait()).await;
    assert!(result.is_err(), "a timed-out heartbeat must not fire again");
}

// =========================================================================
// Pong
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_on_pong_moves_deadline_exactly_one_interval() {
    let mut hb = heartbeat();
    hb.wait().await;

    tokio::time::advance(Duration::from_secs(20)).await;
    hb.on_pong();
    let ponged = Instant::now();
    assert_eq!(hb.deadline(), Some(ponged + INTERVAL));
    assert!(!hb.is_awaiting_pong());

    // Next event is a fresh ping, one interval after the pong.
    assert_eq!(hb.wait().await, HeartbeatEvent::SendPing);
    assert_fired_after(ponged, INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_regular_pongs_keep_connection_alive() {
    let mut hb = heartbeat();

    for _ in 0..5 {
        assert_eq!(hb.wait().await, HeartbeatEvent::SendPing);
        tokio::time::advance(INTERVAL / 2).await;
        hb.on_pong();
    }
    assert_eq!(hb.pings_sent(), 5);
    assert!(hb.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_wait_future_keeps_deadline() {
    let mut hb = heartbeat();
    hb.wait().await;
    let deadline = hb.deadline();

    // A select! branch that loses the race drops the wait future.
    let _ = tokio::time::timeout(Duration::from_secs(1), hb.wait()).await;
    assert_eq!(hb.deadline(), deadline);
    assert!(hb.is_awaiting_pong());
}

// =========================================================================
// Stop / disabled
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_timer() {
    let mut hb = heartbeat();
    hb.wait().await;
    hb.stop();
    hb.stop();

    assert!(!hb.is_running());
    let result = tokio::time::timeout(INTERVAL * 10, hb.wait()).await;
    assert!(result.is_err());

    // A late pong doesn't restart it.
    hb.on_pong();
    assert!(!hb.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_heartbeat_never_fires() {
    let mut hb = Heartbeat::new(HeartbeatConfig::disabled());
    let result = tokio::time::timeout(Duration::from_secs(3600), hb.wait()).await;
    assert!(result.is_err());
}
