//! Monotonic time source and the smoothed-RTT/RTO estimator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Seam standing in for the wall clock so the RTO-driven retransmission
/// path can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Production clock: nanoseconds since the clock was constructed.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Test clock that only advances when told to.
#[derive(Debug, Default)]
pub struct VirtualClock {
    nanos: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

const INITIAL_RTO_NANOS: u64 = 5_000_000_000;

/// Smoothed RTT / RTTVAR / RTO estimator (RFC 6298-style constants).
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    rtt_est: Option<f64>,
    rtt_dev: f64,
    rto: u64,
}

impl RttEstimator {
    pub fn new() -> Self {
        RttEstimator {
            rtt_est: None,
            rtt_dev: 0.0,
            rto: INITIAL_RTO_NANOS,
        }
    }

    pub fn rto(&self) -> u64 {
        self.rto
    }

    pub fn rtt_est(&self) -> Option<f64> {
        self.rtt_est
    }

    pub fn rtt_dev(&self) -> f64 {
        self.rtt_dev
    }

    /// Folds one RTT sample into the estimate and returns the new RTO.
    pub fn observe(&mut self, sample_nanos: u64) -> u64 {
        let sample = sample_nanos as f64;

        match self.rtt_est {
            None => {
                self.rtt_est = Some(sample);
                self.rtt_dev = 0.0;
                self.rto = (2.0 * sample) as u64;
            }
            Some(prev_est) => {
                self.rtt_dev = 0.75 * self.rtt_dev + 0.25 * (prev_est - sample).abs();
                let new_est = 0.875 * prev_est + 0.125 * sample;
                self.rtt_est = Some(new_est);
                self.rto = (new_est + 4.0 * self.rtt_dev) as u64;
            }
        }

        self.rto
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_rto_before_any_sample() {
        let est = RttEstimator::new();
        assert_eq!(est.rto(), INITIAL_RTO_NANOS);
    }

    #[test]
    fn first_sample_sets_rto_to_double() {
        let mut est = RttEstimator::new();
        let rto = est.observe(100);
        assert_eq!(rto, 200);
        assert_eq!(est.rtt_dev(), 0.0);
    }

    #[test]
    fn rto_never_below_rtt_est() {
        let mut est = RttEstimator::new();
        est.observe(100);
        let rto = est.observe(150);
        assert!(rto as f64 >= est.rtt_est().unwrap());
    }

    #[test]
    fn virtual_clock_only_advances_on_command() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(42);
        assert_eq!(clock.now(), 42);
        assert_eq!(clock.now(), 42);
    }
}
