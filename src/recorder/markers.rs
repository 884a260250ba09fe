//! Marker placement (§4.2.2): overlays pending markers onto a chunk's
//! status vector, using a `searchsorted`-style index lookup to place each
//! marker at the sample whose timestamp is closest, and keeping markers
//! whose timestamp falls after the chunk pending for the next one.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::logger::Logger;
use crate::types::{Marker, MarkerKind};

#[derive(Debug, Serialize)]
pub struct MarkerLogEntry {
    pub timestamp: f64,
    pub received_at: f64,
    pub code: i32,
    pub index: Option<usize>,
    pub chunk_relative_timestamp: f64,
}

struct State {
    pending: VecDeque<Marker>,
    current_switch_code: i32,
}

/// The pending-marker queue plus the currently-active switch code, guarded
/// by a single `parking_lot::Mutex` (per the concurrency model's marker
/// lock).
pub struct MarkerQueue {
    state: Mutex<State>,
}

impl MarkerQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                current_switch_code: 0,
            }),
        }
    }

    /// Enqueue a marker submitted by the client (or a device's own marker
    /// path, for devices that don't mark in hardware).
    pub fn submit(&self, marker: Marker) {
        self.state.lock().pending.push_back(marker);
    }

    pub fn discard_all(&self) {
        self.state.lock().pending.clear();
    }

    /// Overlay pending markers onto a chunk's timestamps (relative to T0),
    /// returning the resulting status vector. `t0` is the recorder's epoch
    /// origin, needed to convert each marker's absolute epoch timestamp into
    /// the same T0-relative frame the chunk timestamps are already in.
    /// Markers placed or deferred are appended to `log` when present.
    pub fn apply(&self, timestamps: &[f64], t0: f64, log: Option<&mut Logger<MarkerLogEntry>>) -> Vec<i32> {
        let mut state = self.state.lock();
        let n = timestamps.len();

        let mut status = if state.current_switch_code != 0 {
            vec![state.current_switch_code; n]
        } else {
            vec![0; n]
        };

        let due: Vec<Marker> = std::mem::take(&mut state.pending).into_iter().collect();
        let mut still_pending = VecDeque::new();

        for m in due {
            let idx = searchsorted(timestamps, m.timestamp - t0);

            let placed_index = if idx >= n {
                still_pending.push_back(m);
                None
            } else {
                let place_at = idx;
                match m.kind {
                    MarkerKind::Trigger => status[place_at] = m.code,
                    MarkerKind::Switch => {
                        for s in status.iter_mut().skip(place_at) {
                            *s = m.code;
                        }
                        state.current_switch_code = m.code;
                    }
                }
                Some(place_at)
            };

            if let Some(logger) = log.as_deref_mut() {
                let chunk_relative_timestamp = timestamps.first().copied().unwrap_or(0.0);
                let _ = logger.add(MarkerLogEntry {
                    timestamp: m.timestamp,
                    received_at: m.received_at,
                    code: m.code,
                    index: placed_index,
                    chunk_relative_timestamp,
                });
            }
        }

        state.pending = still_pending;
        status
    }
}

impl Default for MarkerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the first element `>= value`, as `numpy.searchsorted` with the
/// default `side='left'` behaves on a sorted array.
fn searchsorted(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&t| t < value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_marks_a_single_sample() {
        let queue = MarkerQueue::new();
        queue.submit(Marker::new(7, MarkerKind::Trigger, 1.0015, 1.0));
        let timestamps: Vec<f64> = (0..5).map(|i| 1.0 + i as f64 * 0.001).collect();
        let status = queue.apply(&timestamps, 0.0, None);
        assert_eq!(status.iter().filter(|&&s| s == 7).count(), 1);
        assert_eq!(status.iter().filter(|&&s| s == 0).count(), 4);
    }

    #[test]
    fn switch_marker_persists_until_next_switch() {
        let queue = MarkerQueue::new();
        queue.submit(Marker::new(3, MarkerKind::Switch, 1.002, 1.0));
        let timestamps: Vec<f64> = (0..5).map(|i| 1.0 + i as f64 * 0.001).collect();
        let status = queue.apply(&timestamps, 0.0, None);
        assert_eq!(status, vec![0, 0, 3, 3, 3]);

        let next_timestamps: Vec<f64> = (0..5).map(|i| 1.005 + i as f64 * 0.001).collect();
        let next_status = queue.apply(&next_timestamps, 0.0, None);
        assert_eq!(next_status, vec![3, 3, 3, 3, 3]);
    }

    #[test]
    fn future_timestamp_marker_stays_pending() {
        let queue = MarkerQueue::new();
        queue.submit(Marker::new(9, MarkerKind::Trigger, 100.0, 1.0));
        let timestamps: Vec<f64> = (0..5).map(|i| 1.0 + i as f64 * 0.001).collect();
        let status = queue.apply(&timestamps, 0.0, None);
        assert_eq!(status, vec![0; 5]);

        let later_timestamps = vec![100.0005];
        let status = queue.apply(&later_timestamps, 0.0, None);
        assert_eq!(status, vec![9]);
    }

    #[test]
    fn past_timestamp_is_clamped_to_index_zero() {
        let queue = MarkerQueue::new();
        queue.submit(Marker::new(5, MarkerKind::Trigger, 0.0, 1.0));
        let timestamps: Vec<f64> = (0..5).map(|i| 1.0 + i as f64 * 0.001).collect();
        let status = queue.apply(&timestamps, 0.0, None);
        assert_eq!(status[0], 5);
    }

    #[test]
    fn marker_timestamp_is_offset_by_t0_before_placement() {
        // The marker carries an absolute epoch timestamp; with the
        // recorder's T0 at 1000.0 it should land at chunk-relative 1.0015,
        // same as the un-offset case above.
        let timestamps: Vec<f64> = (0..5).map(|i| 1.0 + i as f64 * 0.001).collect();

        let queue = MarkerQueue::new();
        queue.submit(Marker::new(7, MarkerKind::Trigger, 1000.0 + 1.0015, 1000.0));
        let status = queue.apply(&timestamps, 1000.0, None);
        assert_eq!(status.iter().filter(|&&s| s == 7).count(), 1);

        // Without subtracting T0, the marker would look 1000s in the future
        // and stay pending forever.
        let wrong_t0_queue = MarkerQueue::new();
        wrong_t0_queue.submit(Marker::new(7, MarkerKind::Trigger, 1000.0 + 1.0015, 1000.0));
        let status_wrong_t0 = wrong_t0_queue.apply(&timestamps, 0.0, None);
        assert_eq!(status_wrong_t0, vec![0; 5]);
    }
}
