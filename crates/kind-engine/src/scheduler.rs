//! Debounced, loop-guarded scheduling of connection reconciliations
//!
//! Each connection carries a marker that moves through
//!
//! ```text
//! Idle -> Scheduled -> Processing -> Cooldown -> Idle
//! ```
//!
//! A connection only enters `Cooldown` when its reconciliation wrote
//! metadata. While it is `Processing` or cooling down:
//!
//! - a [`Trigger::Echo`] (the connection's own change notification) is
//!   dropped, which absorbs the echo of the engine's write
//! - a [`Trigger::Change`] from an endpoint is deferred and scheduled once
//!   the connection is `Idle` again
//! - a [`Trigger::Forced`] request is scheduled immediately
//!
//! Time comes from an injected [`Clock`], so the scheduler never sleeps and
//! tests drive it with a [`ManualClock`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::TimerPolicy;
use crate::types::ElementId;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock following tokio's timer, including paused test time
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Why a reconciliation is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Something the classification depends on changed
    Change,
    /// The connection's own metadata changed, usually by the engine's write
    Echo,
    /// Endpoints moved; recompute even while in flight
    Forced,
}

/// Scheduling state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Idle,
    /// Waiting for its debounce deadline
    Scheduled { forced: bool },
    /// Being reconciled
    Processing,
    /// Recently wrote its metadata; echoes are ignored
    Cooldown,
}

#[derive(Debug, Clone)]
struct Marker {
    state: MarkerState,
    /// Debounce deadline while scheduled, end of grace while cooling down
    deadline: Option<Instant>,
    /// A change arrived while in flight
    deferred: bool,
}

/// A reconciliation whose debounce elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReconciliation {
    pub connection: ElementId,
    pub forced: bool,
}

/// Coalesces notifications into at most one pending reconciliation per
/// connection
#[derive(Debug)]
pub struct ChangeScheduler {
    markers: HashMap<ElementId, Marker>,
    shared_deadline: Option<Instant>,
    policy: TimerPolicy,
    debounce: Duration,
    cooldown: Duration,
}

impl ChangeScheduler {
    pub fn new(policy: TimerPolicy, debounce: Duration, cooldown: Duration) -> Self {
        Self {
            markers: HashMap::new(),
            shared_deadline: None,
            policy,
            debounce,
            cooldown,
        }
    }

    /// Current marker state of a connection
    pub fn state(&self, connection: &str) -> MarkerState {
        self.markers
            .get(connection)
            .map_or(MarkerState::Idle, |m| m.state)
    }

    /// Request a reconciliation
    ///
    /// Restarts the debounce timer. Returns `false` when the connection is
    /// in flight and the request was dropped (echo) or deferred (change).
    pub fn schedule(&mut self, connection: &str, trigger: Trigger, now: Instant) -> bool {
        let forced = trigger == Trigger::Forced;
        let forced = match self.state(connection) {
            MarkerState::Idle => forced,
            MarkerState::Scheduled { forced: pending } => forced || pending,
            MarkerState::Processing | MarkerState::Cooldown if forced => true,
            state => {
                if trigger == Trigger::Change {
                    if let Some(marker) = self.markers.get_mut(connection) {
                        marker.deferred = true;
                    }
                    log::debug!(
                        "Deferring change for connection '{}' ({:?})",
                        connection,
                        state
                    );
                } else {
                    log::debug!("Ignoring echo for connection '{}' ({:?})", connection, state);
                }
                return false;
            }
        };
        self.arm(connection, forced, now);
        true
    }

    fn arm(&mut self, connection: &str, forced: bool, now: Instant) {
        let deadline = now + self.debounce;
        self.markers.insert(
            connection.to_string(),
            Marker {
                state: MarkerState::Scheduled { forced },
                deadline: Some(deadline),
                deferred: false,
            },
        );
        if self.policy == TimerPolicy::Shared {
            self.shared_deadline = Some(deadline);
        }
    }

    /// Claim every reconciliation whose debounce elapsed
    ///
    /// Claimed connections move to `Processing`. Expired cooldowns return to
    /// `Idle`, or to `Scheduled` when a change was deferred during them. The
    /// result is ordered by connection id.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueReconciliation> {
        let expired: Vec<(ElementId, bool)> = self
            .markers
            .iter()
            .filter(|(_, m)| {
                m.state == MarkerState::Cooldown && m.deadline.is_some_and(|d| d <= now)
            })
            .map(|(id, m)| (id.clone(), m.deferred))
            .collect();
        for (connection, deferred) in expired {
            self.markers.remove(&connection);
            if deferred {
                log::debug!("Scheduling deferred change for connection '{}'", connection);
                self.arm(&connection, false, now);
            }
        }

        let shared_due = match self.policy {
            TimerPolicy::Shared => self.shared_deadline.is_some_and(|d| d <= now),
            TimerPolicy::PerConnection => false,
        };
        if shared_due {
            self.shared_deadline = None;
        }

        let mut due = Vec::new();
        for (connection, marker) in self.markers.iter_mut() {
            let MarkerState::Scheduled { forced } = marker.state else {
                continue;
            };
            let elapsed = match self.policy {
                TimerPolicy::Shared => shared_due,
                TimerPolicy::PerConnection => marker.deadline.is_some_and(|d| d <= now),
            };
            if elapsed {
                marker.state = MarkerState::Processing;
                marker.deadline = None;
                due.push(DueReconciliation {
                    connection: connection.clone(),
                    forced,
                });
            }
        }
        due.sort_by(|a, b| a.connection.cmp(&b.connection));
        due
    }

    /// Mark a claimed reconciliation as done
    ///
    /// Only a reconciliation that `wrote` metadata starts a cooldown, since
    /// nothing else can echo back. Otherwise the connection goes `Idle`, or
    /// straight back to `Scheduled` if a change was deferred meanwhile.
    pub fn finish(&mut self, connection: &str, wrote: bool, now: Instant) {
        let deferred = match self.markers.get(connection) {
            Some(marker) if marker.state == MarkerState::Processing => marker.deferred,
            _ => return,
        };
        if wrote {
            self.markers.insert(
                connection.to_string(),
                Marker {
                    state: MarkerState::Cooldown,
                    deadline: Some(now + self.cooldown),
                    deferred,
                },
            );
        } else if deferred {
            self.arm(connection, false, now);
        } else {
            self.markers.remove(connection);
        }
    }

    /// Drop all state for a connection (e.g. it was deleted)
    pub fn forget(&mut self, connection: &str) {
        self.markers.remove(connection);
    }

    /// Earliest instant at which `take_due` has something to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.markers
            .values()
            .filter_map(|marker| match (marker.state, self.policy) {
                (MarkerState::Scheduled { .. }, TimerPolicy::Shared) => self.shared_deadline,
                (MarkerState::Scheduled { .. }, TimerPolicy::PerConnection)
                | (MarkerState::Cooldown, _) => marker.deadline,
                _ => None,
            })
            .min()
    }

    /// Number of connections waiting for their debounce
    pub fn pending(&self) -> usize {
        self.markers
            .values()
            .filter(|m| matches!(m.state, MarkerState::Scheduled { .. }))
            .count()
    }

    /// Number of in-flight connections holding a deferred change
    pub fn deferred(&self) -> usize {
        self.markers.values().filter(|m| m.deferred).count()
    }

    /// Whether no connection has any scheduling state
    pub fn is_idle(&self) -> bool {
        self.markers.is_empty()
    }
}
