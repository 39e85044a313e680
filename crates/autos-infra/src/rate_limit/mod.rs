pub mod middleware;
pub mod window;

pub use middleware::{rate_limit_middleware, RateLimitState};
pub use window::{InMemoryWindowStore, SlidingWindowLimiter, WindowStore};
