//! # Retry pacing for keeper loops.
//!
//! [`BackoffPolicy`] computes the next pause between attempts:
//! - `first` the initial pause;
//! - `factor` the multiplicative growth factor;
//! - `max` the cap;
//! - `jitter` optional randomization to avoid synchronized retries.
//!
//! The keeper's shutdown wait uses an exponential instance
//! ([`BackoffPolicy::drain`]): 10ms doubling up to 1s, which bounds how
//! often the registry is polled while item loops wind down.

use std::time::Duration;

use rand::Rng;

/// Randomization applied on top of a computed backoff delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`; preserves most of the pause while
    /// still spreading load.
    Equal,
}

impl JitterPolicy {
    /// Applies the jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => {
                let nanos = delay.as_nanos() as u64;
                if nanos == 0 {
                    return delay;
                }
                Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
            }
            JitterPolicy::Equal => {
                let half = delay / 2;
                let nanos = half.as_nanos() as u64;
                if nanos == 0 {
                    return delay;
                }
                half + Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
            }
        }
    }
}

/// Grows a pause multiplicatively between attempts, capped at `max`.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Pause before the first retry.
    pub first: Duration,
    /// Cap for the computed pause.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the computed pause.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 100ms pause, capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Pacing for drain-style waits: 10ms doubling up to 1s.
    pub fn drain() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the next pause from the previous one.
    ///
    /// `None` yields `first` clamped to `max`; otherwise the previous pause
    /// is multiplied by `factor` and capped at `max`.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if !mul.is_finite() {
                    self.max
                } else {
                    d.mul_f64(self.factor)
                }
            }
        };
        self.jitter.apply(unclamped.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pause_is_clamped_to_max() {
        let b = BackoffPolicy {
            first: Duration::from_secs(5),
            max: Duration::from_secs(2),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(b.next(None), Duration::from_secs(2));
    }

    #[test]
    fn exponential_growth_caps_at_max() {
        let b = BackoffPolicy::drain();
        assert_eq!(b.next(None), Duration::from_millis(10));
        assert_eq!(b.next(Some(Duration::from_millis(10))), Duration::from_millis(20));
        assert_eq!(b.next(Some(Duration::from_millis(800))), Duration::from_secs(1));
        assert_eq!(b.next(Some(Duration::from_secs(1))), Duration::from_secs(1));
    }

    #[test]
    fn constant_factor_keeps_pause_stable() {
        let b = BackoffPolicy::default();
        let d = b.next(Some(Duration::from_millis(100)));
        assert_eq!(d, Duration::from_millis(100));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let b = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 1.0,
            jitter: JitterPolicy::Full,
        };
        for _ in 0..64 {
            assert!(b.next(None) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn equal_jitter_preserves_lower_half() {
        let b = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 1.0,
            jitter: JitterPolicy::Equal,
        };
        for _ in 0..64 {
            let d = b.next(None);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }
}
