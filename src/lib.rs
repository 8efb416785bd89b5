// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{RateLimitAlgorithm, RateLimitResult, RateLimitState, SlidingWindow};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, RateLimitConfig};
pub use error::{RateLimiterError, Result, StorageError};
pub use logging::init as init_logging;
