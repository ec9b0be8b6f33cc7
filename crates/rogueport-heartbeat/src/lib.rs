//! Ping/pong liveness timer for one rogueport connection.
//!
//! The heartbeat owns a single deadline. When it passes:
//!
//! - if a ping is still unanswered, the client is gone
//!   ([`HeartbeatEvent::TimedOut`]);
//! - otherwise it is time to send the next ping ([`HeartbeatEvent::SendPing`]),
//!   and the client has one interval to answer it.
//!
//! Every `Pong` ([`Heartbeat::on_pong`]) replaces the deadline with
//! `now + interval`. There is only ever one deadline, so re-arming can't
//! leave an older timer behind.
//!
//! # Disabled mode
//!
//! With a zero interval, or after [`Heartbeat::stop`], [`Heartbeat::wait`]
//! pends forever.
//!
//! # Integration
//!
//! The heartbeat sits inside the connection task's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         frame = conn.recv() => { /* Pong → heartbeat.on_pong() */ }
//!         event = heartbeat.wait() => match event {
//!             HeartbeatEvent::SendPing => send_ping().await?,
//!             HeartbeatEvent::TimedOut => break,
//!         },
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings, and time allowed for each reply.
    /// Zero disables the heartbeat.
    pub interval: Duration,
}

impl HeartbeatConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::with_interval(Duration::from_secs(600))
    }
}

/// What the connection should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping to the client.
    SendPing,
    /// The last ping went unanswered for a whole interval.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// One connection's liveness timer.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    /// `None` when stopped or disabled.
    deadline: Option<Instant>,
    awaiting_pong: bool,
    pings_sent: u64,
}

impl Heartbeat {
    /// Creates a heartbeat whose first ping is due immediately.
    pub fn new(config: HeartbeatConfig) -> Self {
        let deadline = if config.is_disabled() {
            debug!("heartbeat disabled");
            None
        } else {
            Some(Instant::now())
        };
        Self {
            interval: config.interval,
            deadline,
            awaiting_pong: false,
            pings_sent: 0,
        }
    }

    /// Waits for the deadline and reports what it means.
    ///
    /// After [`HeartbeatEvent::TimedOut`] the heartbeat is stopped. Safe to
    /// use as a `select!` branch: dropping the future loses nothing, the
    /// deadline is only consumed once it has passed.
    pub async fn wait(&mut self) -> HeartbeatEvent {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };

        time::sleep_until(deadline).await;

        if self.awaiting_pong {
            trace!(pings_sent = self.pings_sent, "ping unanswered");
            self.deadline = None;
            return HeartbeatEvent::TimedOut;
        }

        self.awaiting_pong = true;
        self.pings_sent += 1;
        self.deadline = Some(Instant::now() + self.interval);
        HeartbeatEvent::SendPing
    }

    /// Records a `Pong`: the client is alive, and the deadline moves to
    /// exactly one interval from now.
    pub fn on_pong(&mut self) {
        if self.deadline.is_none() {
            return;
        }
        self.awaiting_pong = false;
        self.deadline = Some(Instant::now() + self.interval);
    }

    /// Cancels the timer. Idempotent.
    pub fn stop(&mut self) {
        self.deadline = None;
        self.awaiting_pong = false;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// When the timer fires next, if it is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
