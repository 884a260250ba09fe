//! Per-chunk timestamp estimation (§4.2.1): given a record decoded from
//! bytes read between `begin_read` and `end_read`, assign each of its
//! samples a timestamp relative to the Recorder's `T0`, using one of five
//! strategies.

use std::collections::VecDeque;
use std::time::Instant;

use crate::types::TimingMode;

pub struct TimingResult {
    pub timestamps: Vec<f64>,
    pub drift: f64,
    pub estimated_sample_rate: f64,
}

/// Tracks the running state (`last_id`, the smoothed-rate window, total
/// samples seen) a timing strategy needs across chunks.
pub struct TimingEstimator {
    mode: TimingMode,
    nominal_rate: f64,
    t0: Instant,
    last_id: f64,
    sample_rate_window: VecDeque<f64>,
    window_cap: usize,
    total_samples: u64,
}

impl TimingEstimator {
    pub fn new(mode: TimingMode, nominal_rate: f64, buffer_size_seconds: f64, t0: Instant) -> Self {
        let window_cap = (10.0 / buffer_size_seconds).ceil().max(1.0) as usize;
        Self {
            mode,
            nominal_rate,
            t0,
            last_id: 0.0,
            sample_rate_window: VecDeque::with_capacity(window_cap),
            window_cap,
            total_samples: 0,
        }
    }

    pub fn set_mode(&mut self, mode: TimingMode) {
        self.mode = mode;
    }

    /// Estimate timestamps for `nsamples` samples decoded from a record read
    /// between `begin_read` and `end_read`.
    pub fn estimate(&mut self, nsamples: usize, begin_read: Instant, end_read: Instant) -> TimingResult {
        let n = nsamples as f64;
        let dt = end_read.saturating_duration_since(begin_read).as_secs_f64();
        let estimated_sample_rate = if dt > 0.0 { n / dt } else { self.nominal_rate };

        if self.sample_rate_window.len() == self.window_cap {
            self.sample_rate_window.pop_front();
        }
        self.sample_rate_window.push_back(estimated_sample_rate);
        let smoothed_sample_rate =
            self.sample_rate_window.iter().sum::<f64>() / self.sample_rate_window.len() as f64;

        let relative_begin = begin_read.saturating_duration_since(self.t0).as_secs_f64();
        let relative_end = end_read.saturating_duration_since(self.t0).as_secs_f64();

        let mut timestamps = Vec::with_capacity(nsamples);
        match self.mode {
            TimingMode::Fixed => {
                for k in 1..=nsamples {
                    timestamps.push(self.last_id + k as f64 / self.nominal_rate);
                }
            }
            TimingMode::EndReadRelative => {
                let base = relative_end - n / self.nominal_rate;
                for k in 1..=nsamples {
                    timestamps.push(base + k as f64 / self.nominal_rate);
                }
                if let Some(&first) = timestamps.first() {
                    if first <= self.last_id {
                        let shift = 1.0 / self.nominal_rate;
                        for t in timestamps.iter_mut() {
                            *t += shift;
                        }
                    }
                }
            }
            TimingMode::BeginReadRelative => {
                let base = relative_begin.max(self.last_id);
                for k in 1..=nsamples {
                    timestamps.push(base + k as f64 / self.nominal_rate);
                }
            }
            TimingMode::EstimatedSampleRate => {
                let base = relative_begin.max(self.last_id);
                for k in 1..=nsamples {
                    timestamps.push(base + k as f64 / estimated_sample_rate);
                }
            }
            TimingMode::SmoothedSampleRate => {
                for k in 1..=nsamples {
                    timestamps.push(self.last_id + k as f64 / smoothed_sample_rate);
                }
            }
        }

        if let Some(&last) = timestamps.last() {
            self.last_id = last;
        }
        self.total_samples += nsamples as u64;

        let target = relative_end * self.nominal_rate;
        let drift = target - self.total_samples as f64;

        TimingResult {
            timestamps,
            drift,
            estimated_sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_mode_produces_strictly_monotone_timestamps() {
        let t0 = Instant::now();
        let mut estimator = TimingEstimator::new(TimingMode::Fixed, 1000.0, 0.5, t0);
        let begin = t0 + Duration::from_millis(500);
        let end = begin + Duration::from_millis(500);
        let result = estimator.estimate(500, begin, end);
        for w in result.timestamps.windows(2) {
            assert!(w[1] > w[0]);
        }
        assert_eq!(result.timestamps.len(), 500);
    }

    #[test]
    fn last_id_carries_across_chunks() {
        let t0 = Instant::now();
        let mut estimator = TimingEstimator::new(TimingMode::Fixed, 1000.0, 0.5, t0);
        let begin = t0 + Duration::from_millis(500);
        let end = begin + Duration::from_millis(500);
        let first = estimator.estimate(500, begin, end);
        let second = estimator.estimate(500, end, end + Duration::from_millis(500));
        assert!(second.timestamps[0] > *first.timestamps.last().unwrap());
    }

    #[test]
    fn smoothed_mode_averages_over_bounded_window() {
        let t0 = Instant::now();
        let mut estimator = TimingEstimator::new(TimingMode::SmoothedSampleRate, 1000.0, 1.0, t0);
        assert_eq!(estimator.window_cap, 10);
        let begin = t0 + Duration::from_millis(1000);
        let end = begin + Duration::from_millis(1000);
        let result = estimator.estimate(1000, begin, end);
        assert!((result.estimated_sample_rate - 1000.0).abs() < 1.0);
    }
}
