//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod lists;
mod rules;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{HeaderKeySpec, HeaderLookup, KeyExtractor, KeyRejection, RateLimitKey};
pub use limiter::{Decision, Denial, LimiterConfig, RateLimiter, MAX_WINDOW};
pub use lists::{ListPolicy, ListVerdict, LOCAL_ADDRESSES};
pub use rules::{HeaderRuleConfig, ResponseConfig, ResponsesConfig, RuleConfig, RulesConfig};
pub use window::{Algorithm, TimeWindow, WindowOutcome, WindowState, WindowStore};
