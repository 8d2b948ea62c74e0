//! Production environment backed by the system clock.

use revline_core::Environment;

/// Environment using `std::time::Instant`.
///
/// Time advances on its own, so anything driven by it is not reproducible.
/// Tests use a virtual clock instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }
}
