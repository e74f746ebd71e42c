//! Resilience: per-dependency circuit breakers and the guarded clients that use them.

mod breaker;
mod guarded;

pub use breaker::{
    BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerState, FallbackReason, Guarded,
};
pub use guarded::{GuardedNewsAi, GuardedShareApi, NEWS_AI, SHARE_API};
