pub mod breaker;
pub mod fallback;
pub mod types;

pub use breaker::CircuitBreaker;
pub use fallback::FallbackResponse;
pub use types::{
    CircuitBreakerConfig, CircuitRecord, CircuitState, CircuitStats, CircuitStatus,
    FailureRecord, FallbackOverride, Permit,
};
