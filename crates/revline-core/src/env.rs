//! Environment abstraction for deterministic testing.
//!
//! Decouples the state machines from the system clock. Production uses
//! `std::time::Instant`; the simulation harness uses a virtual clock that only
//! moves when a test advances it.

use std::time::Duration;

/// Abstract environment providing time.
///
/// # Invariants
///
/// - `now()` never goes backwards within a single execution context.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Only subtraction is required: components store the instant an interval
    /// started and compare the elapsed time against a duration.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;
}
