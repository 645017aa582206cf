use std::convert::TryFrom;
use std::time::Duration;

use thiserror::Error;

/// Default tolerated difference between sender and recipient clocks.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);
/// Default lifetime of nonce cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(100);

/// Errors raised when building an invalid replay-protection configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The acceptance window would be empty or inverted.
    #[error("Clock skew ({clock_skew:?}) must be strictly less than cache TTL ({cache_ttl:?})")]
    SkewNotBelowTtl {
        /// Configured clock skew.
        clock_skew: Duration,
        /// Configured cache TTL.
        cache_ttl: Duration,
    },
    /// The nonce cache would forget nonces while their timestamps are still
    /// acceptable.
    #[error("Nonce cache TTL ({cache:?}) is shorter than the timestamp window TTL ({window:?})")]
    CacheTtlTooShort {
        /// TTL of the nonce cache.
        cache: Duration,
        /// TTL the timestamp window was built for.
        window: Duration,
    },
    /// A nonce cache must be allowed to hold at least one entry.
    #[error("Nonce cache capacity must be non-zero")]
    ZeroCapacity,
    /// A nonce cache needs at least one shard.
    #[error("Nonce cache shard count must be non-zero")]
    ZeroShards,
    /// Nonces must carry at least one byte of randomness.
    #[error("Nonce length must be non-zero")]
    ZeroNonceLength,
}

/// Reason a timestamp fell outside the acceptance window.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// The timestamp is at or beyond `now + clock_skew`.
    #[error("Timestamp {timestamp} is in the future (now {now})")]
    FromFuture {
        /// Claimed timestamp.
        timestamp: i64,
        /// Recipient time.
        now: i64,
    },
    /// The timestamp is too old for the nonce cache to still vouch for it.
    #[error("Timestamp {timestamp} is too far in the past (now {now})")]
    FromPast {
        /// Claimed timestamp.
        timestamp: i64,
        /// Recipient time.
        now: i64,
    },
}

/// Decides whether a claimed creation time is acceptable.
///
/// A timestamp is accepted iff
/// `now - (cache_ttl - clock_skew) < timestamp < now + clock_skew`.
/// The lower bound ensures that any accepted nonce is still held by a nonce
/// cache with the same TTL for as long as the request could be replayed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimestampWindow {
    clock_skew: i64,
    cache_ttl: i64,
}

impl Default for TimestampWindow {
    fn default() -> Self {
        Self {
            clock_skew: DEFAULT_CLOCK_SKEW.as_secs() as i64,
            cache_ttl: DEFAULT_CACHE_TTL.as_secs() as i64,
        }
    }
}

fn whole_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl TimestampWindow {
    /// Builds a window, failing unless `clock_skew < cache_ttl` (whole
    /// seconds).
    pub fn new(clock_skew: Duration, cache_ttl: Duration) -> Result<Self, ConfigError> {
        let (skew, ttl) = (whole_secs(clock_skew), whole_secs(cache_ttl));
        if skew >= ttl {
            return Err(ConfigError::SkewNotBelowTtl {
                clock_skew,
                cache_ttl,
            });
        }
        Ok(Self {
            clock_skew: skew,
            cache_ttl: ttl,
        })
    }
    /// Returns the tolerated clock skew.
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew as u64)
    }
    /// Returns the nonce cache TTL this window is paired with.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl as u64)
    }

    /// Checks `timestamp` against the window around `now`.
    pub fn check(&self, timestamp: i64, now: i64) -> Result<(), WindowError> {
        if timestamp >= now.saturating_add(self.clock_skew) {
            return Err(WindowError::FromFuture { timestamp, now });
        }
        if timestamp <= now.saturating_sub(self.cache_ttl - self.clock_skew) {
            return Err(WindowError::FromPast { timestamp, now });
        }
        Ok(())
    }

    /// Returns true if `timestamp` is inside the window around `now`.
    pub fn is_acceptable(&self, timestamp: i64, now: i64) -> bool {
        self.check(timestamp, now).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_500_000_000;

    #[test]
    fn default_window() {
        let window = TimestampWindow::default();
        assert_eq!(window.clock_skew(), Duration::from_secs(5));
        assert_eq!(window.cache_ttl(), Duration::from_secs(100));
        assert_eq!(
            TimestampWindow::new(DEFAULT_CLOCK_SKEW, DEFAULT_CACHE_TTL),
            Ok(window)
        );
    }

    #[test]
    fn window_edges() {
        let window = TimestampWindow::default();
        let (skew, ttl) = (5, 100);

        assert!(window.is_acceptable(NOW, NOW));
        assert!(window.is_acceptable(NOW + skew - 1, NOW));
        assert!(!window.is_acceptable(NOW + skew, NOW));
        assert!(window.is_acceptable(NOW - (ttl - skew) + 1, NOW));
        assert!(!window.is_acceptable(NOW - (ttl - skew), NOW));
    }

    #[test]
    fn distinguishes_reasons() {
        let window = TimestampWindow::default();
        assert_eq!(
            window.check(NOW + 5, NOW),
            Err(WindowError::FromFuture {
                timestamp: NOW + 5,
                now: NOW
            })
        );
        assert_eq!(
            window.check(NOW - 95, NOW),
            Err(WindowError::FromPast {
                timestamp: NOW - 95,
                now: NOW
            })
        );
        assert_eq!(window.check(NOW - 94, NOW), Ok(()));
    }

    #[test]
    fn rejects_inverted_configuration() {
        assert!(matches!(
            TimestampWindow::new(Duration::from_secs(100), Duration::from_secs(100)),
            Err(ConfigError::SkewNotBelowTtl { .. })
        ));
        assert!(TimestampWindow::new(Duration::from_secs(101), Duration::from_secs(100)).is_err());
        assert!(TimestampWindow::new(Duration::from_secs(0), Duration::from_secs(0)).is_err());
        assert!(TimestampWindow::new(Duration::from_secs(0), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let window = TimestampWindow::default();
        assert!(!window.is_acceptable(i64::MAX, i64::MAX - 1000));
        assert!(!window.is_acceptable(i64::MIN, 0));
        assert!(!window.is_acceptable(0, i64::MIN));
        assert!(window.is_acceptable(i64::MAX - 10, i64::MAX - 10));
    }
}
