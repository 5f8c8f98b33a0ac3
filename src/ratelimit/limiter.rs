//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::key::{HeaderKeySpec, HeaderLookup, KeyExtractor, KeyRejection, RateLimitKey};
use super::lists::{ListPolicy, ListVerdict};
use super::window::{Algorithm, WindowOutcome, WindowState, WindowStore};
use crate::error::{GatekeeperError, Result};

/// Longest window a limiter accepts; longer windows could not be added to a
/// clock reading.
pub const MAX_WINDOW: Duration = Duration::from_secs(u64::MAX / 2);

/// Configuration for a rate limit.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Name used in logs and as the pipeline stage name
    pub name: String,
    /// Maximum requests admitted per window
    pub limit: u64,
    /// Length of the window
    pub window: Duration,
    /// Counting algorithm
    pub algorithm: Algorithm,
    /// Header qualifying the client address, if any
    pub key: Option<HeaderKeySpec>,
}

impl LimiterConfig {
    /// Create a fixed-window, address-keyed configuration.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            name: "default".to_string(),
            limit,
            window,
            algorithm: Algorithm::Fixed,
            key: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn key(mut self, key: HeaderKeySpec) -> Self {
        self.key = Some(key);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(GatekeeperError::InvalidLimit);
        }
        if self.window.is_zero() || self.window > MAX_WINDOW {
            return Err(GatekeeperError::InvalidWindow);
        }
        Ok(())
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The key has used up its window
    RateLimited { retry_after_secs: u64 },
    /// The client address is blacklisted
    Blacklisted,
    /// No key could be derived from the request
    InvalidKey(KeyRejection),
}

/// The outcome of checking one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through. `remaining_secs` is the time until the
    /// window frees up, or `None` when the client bypassed counting.
    Admit { remaining_secs: Option<u64> },
    /// Refuse the request.
    Deny(Denial),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }
}

/// The rate limiter for one configured rule.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    config: LimiterConfig,
    keys: KeyExtractor,
    store: WindowStore,
    lists: Arc<ListPolicy>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter using the system clock.
    pub fn new(config: LimiterConfig, lists: Arc<ListPolicy>) -> Result<Self> {
        Self::with_clock(config, lists, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter reading time from `clock`.
    ///
    /// Fails if the limit is zero, the window is zero or longer than
    /// [`MAX_WINDOW`], or the key header is unusable.
    pub fn with_clock(
        config: LimiterConfig,
        lists: Arc<ListPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let keys = KeyExtractor::new(config.key.as_ref())?;
        let store = WindowStore::new(config.limit, config.window, config.algorithm);

        debug!(
            name = %config.name,
            limit = config.limit,
            window = ?config.window,
            algorithm = ?config.algorithm,
            header = ?keys.header_name(),
            "Rate limiter registered"
        );

        Ok(Self {
            config,
            keys,
            store,
            lists,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Check a request from `address` carrying `headers`.
    ///
    /// List verdicts and key rejections short-circuit before any window
    /// state is touched.
    pub fn check<H>(&self, address: &str, headers: &H) -> Decision
    where
        H: HeaderLookup + ?Sized,
    {
        match self.lists.verdict(address) {
            ListVerdict::Whitelisted => {
                trace!(
                    limiter = %self.config.name,
                    address = %address,
                    "Whitelisted address admitted"
                );
                return Decision::Admit {
                    remaining_secs: None,
                };
            }
            ListVerdict::Blacklisted => {
                debug!(
                    limiter = %self.config.name,
                    address = %address,
                    "Blacklisted address denied"
                );
                return Decision::Deny(Denial::Blacklisted);
            }
            ListVerdict::Unlisted => {}
        }

        let key = match self.keys.extract(address, headers) {
            Ok(key) => key,
            Err(rejection) => {
                debug!(
                    limiter = %self.config.name,
                    address = %address,
                    reason = %rejection,
                    "Request key rejected"
                );
                return Decision::Deny(Denial::InvalidKey(rejection));
            }
        };

        self.check_key(key)
    }

    /// Count a request for an already-derived key.
    pub fn check_key(&self, key: RateLimitKey) -> Decision {
        let now = self.clock.now();

        trace!(limiter = %self.config.name, key = %key, "Checking rate limit");

        match self.store.evaluate(key.clone(), now) {
            WindowOutcome::Admit { remaining_secs } => Decision::Admit {
                remaining_secs: Some(remaining_secs),
            },
            WindowOutcome::Deny { retry_after_secs } => {
                debug!(
                    limiter = %self.config.name,
                    key = %key,
                    retry_after_secs = retry_after_secs,
                    "Rate limit exceeded"
                );
                Decision::Deny(Denial::RateLimited { retry_after_secs })
            }
        }
    }

    /// Get the window state for a key.
    ///
    /// Returns `None` if no state exists for the key.
    pub fn state(&self, key: &RateLimitKey) -> Option<WindowState> {
        self.store.state(key)
    }

    /// Drop state for keys whose windows have elapsed.
    pub fn sweep(&self) -> usize {
        self.store.sweep(self.clock.now())
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    const NO_HEADERS: [(&str, &str); 0] = [];

    fn limiter(config: LimiterConfig) -> (RateLimiter, Arc<ListPolicy>, ManualClock) {
        let lists = Arc::new(ListPolicy::new());
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(config, lists.clone(), Arc::new(clock.clone())).unwrap();
        (limiter, lists, clock)
    }

    fn address_key(address: &str) -> RateLimitKey {
        RateLimitKey::Address(address.to_string())
    }

    #[test]
    fn test_rejects_zero_limit() {
        let config = LimiterConfig::new(0, Duration::from_secs(1));
        let result = RateLimiter::new(config, Arc::new(ListPolicy::new()));
        assert!(matches!(result, Err(GatekeeperError::InvalidLimit)));
    }

    #[test]
    fn test_rejects_zero_window() {
        let config = LimiterConfig::new(1, Duration::ZERO);
        let result = RateLimiter::new(config, Arc::new(ListPolicy::new()));
        assert!(matches!(result, Err(GatekeeperError::InvalidWindow)));
    }

    #[test]
    fn test_rejects_window_beyond_max() {
        let lists = Arc::new(ListPolicy::new());

        let result = RateLimiter::new(LimiterConfig::new(1, Duration::MAX), lists.clone());
        assert!(matches!(result, Err(GatekeeperError::InvalidWindow)));

        let result = RateLimiter::new(LimiterConfig::new(1, MAX_WINDOW), lists);
        assert!(result.is_ok());
    }

    #[test]
    fn test_max_window_does_not_overflow() {
        let (limiter, _, clock) = limiter(LimiterConfig::new(1, MAX_WINDOW));
        clock.set(Duration::from_secs(1_000_000));

        assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
        assert!(!limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let config = LimiterConfig::new(1, Duration::from_secs(1))
            .key(HeaderKeySpec::new("X-Api-Key").pattern("(["));
        let result = RateLimiter::new(config, Arc::new(ListPolicy::new()));
        assert!(matches!(result, Err(GatekeeperError::InvalidPattern { .. })));
    }

    #[test]
    fn test_fixed_window_scenario() {
        let (limiter, _, clock) = limiter(LimiterConfig::new(3, Duration::from_secs(10)));

        for t in 0..3 {
            clock.set(Duration::from_secs(t));
            assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
        }

        clock.set(Duration::from_secs(3));
        assert_eq!(
            limiter.check("10.0.0.1", &NO_HEADERS[..]),
            Decision::Deny(Denial::RateLimited {
                retry_after_secs: 7
            })
        );

        clock.set(Duration::from_secs(11));
        assert_eq!(
            limiter.check("10.0.0.1", &NO_HEADERS[..]),
            Decision::Admit {
                remaining_secs: Some(10)
            }
        );
    }

    #[test]
    fn test_sliding_window_scenario() {
        let config = LimiterConfig::new(2, Duration::from_secs(5)).algorithm(Algorithm::Sliding);
        let (limiter, _, clock) = limiter(config);

        assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
        clock.set(Duration::from_secs(1));
        assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());

        clock.set(Duration::from_secs(2));
        assert_eq!(
            limiter.check("10.0.0.1", &NO_HEADERS[..]),
            Decision::Deny(Denial::RateLimited {
                retry_after_secs: 3
            })
        );

        clock.set(Duration::from_millis(5100));
        assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
    }

    #[test]
    fn test_whitelist_wins_over_blacklist_and_counters() {
        let (limiter, lists, _) = limiter(LimiterConfig::new(1, Duration::from_secs(60)));
        lists.add_to_blacklist(["10.0.0.1"]);
        lists.add_to_whitelist(["10.0.0.1"]);

        for _ in 0..5 {
            assert_eq!(
                limiter.check("10.0.0.1", &NO_HEADERS[..]),
                Decision::Admit {
                    remaining_secs: None
                }
            );
        }
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_blacklist_short_circuits() {
        let (limiter, lists, _) = limiter(LimiterConfig::new(1, Duration::from_secs(60)));
        lists.add_to_blacklist(["10.0.0.1"]);

        for _ in 0..3 {
            assert_eq!(
                limiter.check("10.0.0.1", &NO_HEADERS[..]),
                Decision::Deny(Denial::Blacklisted)
            );
        }
        assert!(limiter.state(&address_key("10.0.0.1")).is_none());

        // Removing the entry restores normal counting with a full quota.
        lists.remove_from_blacklist(["10.0.0.1"]);
        assert!(limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit());
    }

    #[test]
    fn test_header_failures_do_not_touch_state() {
        let config = LimiterConfig::new(1, Duration::from_secs(60))
            .key(HeaderKeySpec::new("X-Api-Key").pattern("[0-9]+"));
        let (limiter, _, _) = limiter(config);

        let missing: [(&str, &str); 0] = [];
        let empty = [("X-Api-Key", "")];
        let invalid = [("X-Api-Key", "abc")];

        assert_eq!(
            limiter.check("10.0.0.1", &missing[..]),
            Decision::Deny(Denial::InvalidKey(KeyRejection::MissingHeader))
        );
        assert_eq!(
            limiter.check("10.0.0.1", &empty[..]),
            Decision::Deny(Denial::InvalidKey(KeyRejection::EmptyHeader))
        );
        assert_eq!(
            limiter.check("10.0.0.1", &invalid[..]),
            Decision::Deny(Denial::InvalidKey(KeyRejection::InvalidHeaderValue))
        );
        assert_eq!(limiter.key_count(), 0);

        let valid = [("X-Api-Key", "123")];
        assert!(limiter.check("10.0.0.1", &valid[..]).is_admit());
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_header_values_are_limited_separately() {
        let config =
            LimiterConfig::new(1, Duration::from_secs(60)).key(HeaderKeySpec::new("X-Api-Key"));
        let (limiter, _, _) = limiter(config);

        let first = [("X-Api-Key", "one")];
        let second = [("X-Api-Key", "two")];

        assert!(limiter.check("10.0.0.1", &first[..]).is_admit());
        assert!(limiter.check("10.0.0.1", &second[..]).is_admit());
        assert!(!limiter.check("10.0.0.1", &first[..]).is_admit());
    }

    #[test]
    fn test_blacklist_checked_before_headers() {
        let config =
            LimiterConfig::new(1, Duration::from_secs(60)).key(HeaderKeySpec::new("X-Api-Key"));
        let (limiter, lists, _) = limiter(config);
        lists.add_to_blacklist(["10.0.0.1"]);

        assert_eq!(
            limiter.check("10.0.0.1", &NO_HEADERS[..]),
            Decision::Deny(Denial::Blacklisted)
        );
    }

    #[test]
    fn test_concurrent_requests_never_exceed_limit() {
        for algorithm in [Algorithm::Fixed, Algorithm::Sliding] {
            let config = LimiterConfig::new(25, Duration::from_secs(60)).algorithm(algorithm);
            let limiter = RateLimiter::new(config, Arc::new(ListPolicy::new())).unwrap();
            let admitted = AtomicU64::new(0);

            std::thread::scope(|scope| {
                for _ in 0..8 {
                    scope.spawn(|| {
                        for _ in 0..50 {
                            if limiter.check("10.0.0.1", &NO_HEADERS[..]).is_admit() {
                                admitted.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            });

            assert_eq!(admitted.load(Ordering::SeqCst), 25, "{:?}", algorithm);
        }
    }

    #[test]
    fn test_sweep_uses_clock() {
        let (limiter, _, clock) = limiter(LimiterConfig::new(1, Duration::from_secs(10)));

        limiter.check("10.0.0.1", &NO_HEADERS[..]);
        limiter.check("10.0.0.2", &NO_HEADERS[..]);
        assert_eq!(limiter.sweep(), 0);

        clock.set(Duration::from_secs(11));
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_clear_counters() {
        let (limiter, _, _) = limiter(LimiterConfig::new(1, Duration::from_secs(10)));

        limiter.check_key(address_key("10.0.0.1"));
        assert_eq!(limiter.key_count(), 1);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
    }
}
