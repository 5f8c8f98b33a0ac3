//! Per-key window state for the fixed window and sliding log algorithms.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::key::RateLimitKey;

/// Named window lengths accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// Counting algorithm used by a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Count requests until a reset timestamp, then start over
    #[default]
    Fixed,
    /// Keep the timestamp of every admitted request inside the window
    Sliding,
}

/// What the store decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Admitted; whole seconds until the window frees up
    Admit { remaining_secs: u64 },
    /// Refused; whole seconds the client should wait
    Deny { retry_after_secs: u64 },
}

/// State tracked for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    Fixed {
        count: u64,
        reset_at: Option<Duration>,
    },
    Sliding {
        events: VecDeque<Duration>,
    },
}

impl WindowState {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Fixed => WindowState::Fixed {
                count: 0,
                reset_at: None,
            },
            Algorithm::Sliding => WindowState::Sliding {
                events: VecDeque::new(),
            },
        }
    }

    /// Record a request at `now` and decide it.
    ///
    /// Fixed windows count denied requests too; sliding logs only record
    /// admitted ones.
    fn evaluate(&mut self, limit: u64, window: Duration, now: Duration) -> WindowOutcome {
        match self {
            WindowState::Fixed { count, reset_at } => {
                let remaining = match *reset_at {
                    Some(reset) if now <= reset => {
                        *count = count.saturating_add(1);
                        reset - now
                    }
                    _ => {
                        *count = 1;
                        *reset_at = Some(now.saturating_add(window));
                        window
                    }
                };

                if *count > limit {
                    WindowOutcome::Deny {
                        retry_after_secs: remaining.as_secs(),
                    }
                } else {
                    WindowOutcome::Admit {
                        remaining_secs: remaining.as_secs(),
                    }
                }
            }
            WindowState::Sliding { events } => {
                prune(events, window, now);

                if events.len() as u64 >= limit {
                    let retry_after = events
                        .front()
                        .map(|oldest| window.saturating_sub(now.saturating_sub(*oldest)))
                        .unwrap_or(Duration::ZERO);
                    return WindowOutcome::Deny {
                        retry_after_secs: ceil_secs(retry_after),
                    };
                }

                events.push_back(now);
                let oldest = events.front().copied().unwrap_or(now);
                WindowOutcome::Admit {
                    remaining_secs: window.saturating_sub(now.saturating_sub(oldest)).as_secs(),
                }
            }
        }
    }

    /// Whether this state can be dropped without changing any later decision.
    fn is_expired(&mut self, window: Duration, now: Duration) -> bool {
        match self {
            WindowState::Fixed { reset_at, .. } => match reset_at {
                Some(reset) => now > *reset,
                None => true,
            },
            WindowState::Sliding { events } => {
                prune(events, window, now);
                events.is_empty()
            }
        }
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(duration: Duration) -> u64 {
    let partial = u64::from(duration.subsec_nanos() > 0);
    duration.as_secs().saturating_add(partial)
}

/// Drop events older than `window` from the front of the log.
fn prune(events: &mut VecDeque<Duration>, window: Duration, now: Duration) {
    while events
        .front()
        .is_some_and(|event| now.saturating_sub(*event) > window)
    {
        events.pop_front();
    }
}

/// Window state for every key seen by one limiter.
///
/// The read-modify-write for a key happens while its map entry is held, so
/// concurrent requests for the same key are serialized and requests for keys
/// in other shards proceed in parallel.
#[derive(Debug)]
pub struct WindowStore {
    limit: u64,
    window: Duration,
    algorithm: Algorithm,
    states: DashMap<RateLimitKey, WindowState>,
}

impl WindowStore {
    pub fn new(limit: u64, window: Duration, algorithm: Algorithm) -> Self {
        Self {
            limit,
            window,
            algorithm,
            states: DashMap::new(),
        }
    }

    /// Record a request for `key` at `now` and decide it.
    pub fn evaluate(&self, key: RateLimitKey, now: Duration) -> WindowOutcome {
        let mut state = match self.states.entry(key) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                debug!(
                    key = %entry.key(),
                    limit = self.limit,
                    window = ?self.window,
                    algorithm = ?self.algorithm,
                    "Creating new window state"
                );
                entry.insert(WindowState::new(self.algorithm))
            }
        };

        let outcome = state.evaluate(self.limit, self.window, now);
        trace!(key = %state.key(), outcome = ?outcome, "Window evaluated");
        outcome
    }

    /// Snapshot of the state held for `key`.
    pub fn state(&self, key: &RateLimitKey) -> Option<WindowState> {
        self.states.get(key).map(|state| state.value().clone())
    }

    /// Remove every state whose window has fully elapsed at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: Duration) -> usize {
        let before = self.states.len();
        let window = self.window;
        self.states.retain(|_, state| !state.is_expired(window, now));
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.states.len(), "Swept expired window states");
        }
        removed
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.states.clear();
    }
}
