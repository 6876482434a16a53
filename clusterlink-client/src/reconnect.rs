//! Reconnection strategies
//!
//! A strategy owns the backoff state of one client. The connection driver
//! asks it for the next delay every time a connection ends, and resets it
//! every time a transport opens.
//!
//! # Built-in Strategies
//!
//! - **MultiplicativeBackoff**: starts at a base delay and grows by a
//!   factor on every disconnect (default: 3s, ×1.5, no ceiling)
//! - **FixedDelay**: the same delay every time
//!
//! # Examples
//!
//! ```rust
//! use clusterlink_client::{MultiplicativeBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = MultiplicativeBackoff::default();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(4500));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(6750));
//!
//! backoff.reset();
//! assert_eq!(backoff.current_delay(), Duration::from_secs(3));
//! ```

use std::time::Duration;

/// Trait for reconnection strategies
///
/// `next_delay` is called once per disconnect and must never return a
/// smaller delay than the previous call until `reset` is called.
pub trait ReconnectionStrategy: Send + Sync {
    /// Grow the backoff for one more disconnect and return the delay to wait
    /// before reconnecting
    fn next_delay(&mut self) -> Duration;

    /// The delay as it stands, without growing it
    fn current_delay(&self) -> Duration;

    /// Return to the base delay after a transport opens
    fn reset(&mut self);
}

/// Multiplicative backoff: `wait = base * factor^disconnects`
///
/// Growth is unbounded unless a ceiling is set with
/// [`MultiplicativeBackoff::with_max_delay`].
#[derive(Debug, Clone)]
pub struct MultiplicativeBackoff {
    base: Duration,
    factor: f64,
    max_delay: Option<Duration>,
    wait_secs: f64,
}

impl MultiplicativeBackoff {
    /// Base delay used by [`MultiplicativeBackoff::default`]
    pub const DEFAULT_BASE: Duration = Duration::from_secs(3);
    /// Growth factor used unless overridden
    pub const DEFAULT_FACTOR: f64 = 1.5;

    /// Create a backoff starting at `base` and growing ×1.5
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            factor: Self::DEFAULT_FACTOR,
            max_delay: None,
            wait_secs: base.as_secs_f64(),
        }
    }

    /// Override the growth factor; values below 1.0 are clamped to 1.0
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = if factor.is_finite() { factor.max(1.0) } else { Self::DEFAULT_FACTOR };
        self
    }

    /// Cap the delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Default for MultiplicativeBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}

impl ReconnectionStrategy for MultiplicativeBackoff {
    fn next_delay(&mut self) -> Duration {
        self.wait_secs *= self.factor;
        if let Some(max) = self.max_delay {
            self.wait_secs = self.wait_secs.min(max.as_secs_f64().max(self.base.as_secs_f64()));
        }
        self.current_delay()
    }

    fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.wait_secs)
    }

    fn reset(&mut self) {
        self.wait_secs = self.base.as_secs_f64();
    }
}

/// Fixed delay between reconnection attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn current_delay(&self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}
