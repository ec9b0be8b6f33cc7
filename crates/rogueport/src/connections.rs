//! Connection lifecycle and the server-wide connection table.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rogueport_transport::ConnectionId;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The lifecycle state of one client connection.
///
/// ```text
/// Open → Authenticating → Running → ClosingGraceful ─┐
///   │          │             └────→ ClosingCrashed ──┴→ Closed
///   └──────────┴──────────────────────────────────────→ Closed
/// ```
///
/// - **Open**: accepted, not yet admitted.
/// - **Authenticating**: admitted, waiting for a login. No process.
/// - **Running**: a game process is attached and its I/O is relayed.
/// - **ClosingGraceful**: the client went away, timed out or the server
///   is draining. The process has been asked to exit.
/// - **ClosingCrashed**: the process exited on its own.
/// - **Closed**: both sides are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Open,
    Authenticating,
    Running,
    ClosingGraceful,
    ClosingCrashed,
    Closed,
}

impl ConnectionState {
    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Open, Authenticating | Closed)
                | (Authenticating, Running | Closed)
                | (Running, ClosingGraceful | ClosingCrashed)
                | (ClosingGraceful | ClosingCrashed, Closed)
        )
    }

    /// Returns `true` while a process may be attached.
    pub fn has_process(self) -> bool {
        matches!(
            self,
            Self::Running | Self::ClosingGraceful | Self::ClosingCrashed
        )
    }

    /// Moves to `target`, logging and refusing an invalid transition.
    pub(crate) fn advance(&mut self, target: Self, conn_id: ConnectionId) -> bool {
        if !self.can_transition_to(target) {
            tracing::debug!(%conn_id, from = %self, to = %target, "ignoring invalid state transition");
            return false;
        }
        tracing::trace!(%conn_id, from = %self, to = %target, "connection state");
        *self = target;
        true
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Running => write!(f, "Running"),
            Self::ClosingGraceful => write!(f, "ClosingGraceful"),
            Self::ClosingCrashed => write!(f, "ClosingCrashed"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionTable
// ---------------------------------------------------------------------------

/// Why a new connection was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `max_connections` connections are already open.
    CapacityExceeded,
    /// The server is shutting down.
    Draining,
}

impl Rejection {
    /// The notice shown to the client.
    pub fn reason(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "The maximum number of connections has been reached, sorry :(",
            Self::Draining => "The server is shutting down.",
        }
    }
}

#[derive(Debug)]
struct Tables {
    max_connections: usize,
    draining: bool,
    open: HashSet<ConnectionId>,
    processes: HashSet<ConnectionId>,
}

/// Every open connection and every live process, plus the drain flag.
///
/// Critical sections are short and never await. Connection tasks learn
/// about a drain through [`subscribe_drain`](Self::subscribe_drain), and
/// the server loop waits on [`wait_drained`](Self::wait_drained).
#[derive(Debug)]
pub struct ConnectionTable {
    tables: Mutex<Tables>,
    draining: watch::Sender<bool>,
    drained: watch::Sender<bool>,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            tables: Mutex::new(Tables {
                max_connections,
                draining: false,
                open: HashSet::new(),
                processes: HashSet::new(),
            }),
            draining: watch::Sender::new(false),
            drained: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection, unless the server is full or draining.
    /// A rejected connection is not tracked.
    pub fn admit(&self, id: ConnectionId) -> Result<(), Rejection> {
        let mut tables = self.lock();
        if tables.draining {
            return Err(Rejection::Draining);
        }
        if tables.open.len() >= tables.max_connections {
            return Err(Rejection::CapacityExceeded);
        }
        tables.open.insert(id);
        Ok(())
    }

    /// Forgets a closed connection. Its process, if any, stays tracked
    /// until [`release_process`](Self::release_process).
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().open.remove(&id)
    }

    /// Records that `id` now owns a process.
    ///
    /// Returns `false` (and records nothing) if it already has one or the
    /// server is draining; no new games start during a drain.
    pub fn attach_process(&self, id: ConnectionId) -> bool {
        let mut tables = self.lock();
        if tables.draining {
            return false;
        }
        tables.processes.insert(id)
    }

    /// Records that the process of `id` has exited.
    ///
    /// Returns `true` exactly once per attached process. Releasing the
    /// last process of a drain marks the server drained.
    pub fn release_process(&self, id: ConnectionId) -> bool {
        let mut tables = self.lock();
        if !tables.processes.remove(&id) {
            return false;
        }
        if tables.draining && tables.processes.is_empty() {
            tracing::info!("last game process exited");
            self.drained.send_replace(true);
        }
        true
    }

    /// Starts the shutdown drain. Returns `false` if it had already begun.
    pub fn begin_drain(&self) -> bool {
        let mut tables = self.lock();
        if tables.draining {
            return false;
        }
        tables.draining = true;
        tracing::info!(
            connections = tables.open.len(),
            processes = tables.processes.len(),
            "draining"
        );
        if tables.processes.is_empty() {
            self.drained.send_replace(true);
        }
        self.draining.send_replace(true);
        true
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// `true` once draining and no process is left.
    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    /// A receiver that flips to `true` when the drain begins.
    pub fn subscribe_drain(&self) -> watch::Receiver<bool> {
        self.draining.subscribe()
    }

    /// Resolves once the drain has begun and the last process has exited.
    pub async fn wait_drained(&self) {
        let mut drained = self.drained.subscribe();
        // The sender lives in `self`, so this can't fail while we wait.
        let _ = drained.wait_for(|done| *done).await;
    }

    /// Applies a reloaded connection cap. Connections already open stay.
    pub fn set_max_connections(&self, max_connections: usize) {
        self.lock().max_connections = max_connections;
    }

    pub fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    pub fn process_count(&self) -> usize {
        self.lock().processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    // =====================================================================
    // ConnectionState
    // =====================================================================

    #[test]
    fn test_connection_state_happy_path_transitions() {
        use ConnectionState::*;
        assert!(Open.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Running));
        assert!(Running.can_transition_to(ClosingGraceful));
        assert!(Running.can_transition_to(ClosingCrashed));
        assert!(ClosingGraceful.can_transition_to(Closed));
        assert!(ClosingCrashed.can_transition_to(Closed));
    }

    #[test]
    fn test_connection_state_rejects_skips_and_reversals() {
        use ConnectionState::*;
        assert!(!Open.can_transition_to(Running));
        assert!(!Running.can_transition_to(Authenticating));
        assert!(!Running.can_transition_to(Closed));
        assert!(!ClosingGraceful.can_transition_to(ClosingCrashed));
        assert!(!Closed.can_transition_to(Open));
    }

    #[test]
    fn test_connection_state_advance_refuses_invalid_target() {
        let mut state = ConnectionState::Authenticating;
        assert!(!state.advance(ConnectionState::ClosingCrashed, id(1)));
        assert_eq!(state, ConnectionState::Authenticating);
        assert!(state.advance(ConnectionState::Running, id(1)));
        assert!(state.has_process());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Authenticating.to_string(), "Authenticating");
        assert_eq!(ConnectionState::ClosingCrashed.to_string(), "ClosingCrashed");
    }

    // =====================================================================
    // Admission
    // =====================================================================

    #[test]
    fn test_admit_enforces_max_connections() {
        let table = ConnectionTable::new(2);
        assert!(table.admit(id(1)).is_ok());
        assert!(table.admit(id(2)).is_ok());
        assert_eq!(table.admit(id(3)), Err(Rejection::CapacityExceeded));
        assert_eq!(table.open_count(), 2, "rejected connection is not tracked");

        table.remove(id(1));
        assert!(table.admit(id(3)).is_ok());
    }

    #[test]
    fn test_admit_refuses_while_draining() {
        let table = ConnectionTable::new(10);
        table.begin_drain();
        assert_eq!(table.admit(id(1)), Err(Rejection::Draining));
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn test_set_max_connections_applies_to_new_admissions() {
        let table = ConnectionTable::new(5);
        table.admit(id(1)).unwrap();
        table.admit(id(2)).unwrap();
        table.set_max_connections(1);
        assert_eq!(table.admit(id(3)), Err(Rejection::CapacityExceeded));
        assert_eq!(table.open_count(), 2);
    }

    // =====================================================================
    // Processes
    // =====================================================================

    #[test]
    fn test_attach_process_at_most_one_per_connection() {
        let table = ConnectionTable::new(10);
        assert!(table.attach_process(id(1)));
        assert!(!table.attach_process(id(1)));
        assert_eq!(table.process_count(), 1);
    }

    #[test]
    fn test_release_process_is_true_exactly_once() {
        let table = ConnectionTable::new(10);
        for _ in 0..3 {
            assert!(table.attach_process(id(1)));
            assert!(table.release_process(id(1)));
            assert!(!table.release_process(id(1)));
        }
        assert_eq!(table.process_count(), 0);
    }

    #[test]
    fn test_attach_process_refused_during_drain() {
        let table = ConnectionTable::new(10);
        table.begin_drain();
        assert!(!table.attach_process(id(1)));
    }

    // =====================================================================
    // Drain
    // =====================================================================

    #[test]
    fn test_begin_drain_is_idempotent() {
        let table = ConnectionTable::new(10);
        let rx = table.subscribe_drain();
        assert!(table.begin_drain());
        assert!(!table.begin_drain());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_drain_without_processes_is_immediately_drained() {
        let table = ConnectionTable::new(10);
        table.admit(id(1)).unwrap();
        table.begin_drain();
        assert!(table.is_drained(), "open connections without games don't block");
    }

    #[test]
    fn test_drain_completes_when_last_process_released() {
        let table = ConnectionTable::new(10);
        table.attach_process(id(1));
        table.attach_process(id(2));
        table.begin_drain();
        assert!(!table.is_drained());

        table.release_process(id(1));
        assert!(!table.is_drained());
        table.release_process(id(2));
        assert!(table.is_drained());
    }

    #[test]
    fn test_process_released_before_drain_does_not_block() {
        let table = ConnectionTable::new(10);
        table.attach_process(id(1));
        table.release_process(id(1));
        table.begin_drain();
        assert!(table.is_drained());
    }

    #[tokio::test]
    async fn test_wait_drained_resolves_after_release() {
        let table = std::sync::Arc::new(ConnectionTable::new(10));
        table.attach_process(id(1));
        table.begin_drain();

        let waiter = {
            let table = std::sync::Arc::clone(&table);
            tokio::spawn(async move { table.wait_drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        table.release_process(id(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("drain should complete")
            .unwrap();
    }
}
