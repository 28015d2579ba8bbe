pub mod quota_meter;
pub mod rate_limiter;
pub mod sliding_window;

pub use quota_meter::{QuotaDecision, QuotaMeter};
pub use rate_limiter::{RateLimitFileConfig, RateLimitRule, RateLimiter, RateLimiterDefaults};
pub use sliding_window::{Decision, SlidingWindowLimiter};
