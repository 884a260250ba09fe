//! Background byte reader for continuous device acquisition.
//!
//! Spawns a thread that reads fixed-size chunks from a device in a tight
//! loop, stamping each chunk with the time it finished reading, and handing
//! finished chunks off through a bounded queue. When the consumer falls
//! behind, the oldest queued chunk is dropped to make room for the newest
//! one (see `evicted` for observability) rather than blocking the reader
//! thread on a full queue, since a stalled reader thread means lost device
//! bytes.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::BciError;

/// One chunk of raw bytes read from the device, stamped with the instant the
/// read completed.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub data: Vec<u8>,
    pub read_started_at: Instant,
    pub read_finished_at: Instant,
}

struct Shared {
    queue: Mutex<VecDeque<RawChunk>>,
    condvar: Condvar,
    evicted: AtomicU64,
    running: AtomicBool,
}

/// Continuously reads fixed-size chunks from a device on a background
/// thread, cycling through `ring_buffers` reusable buffers to round-robin a
/// small pool instead of allocating a fresh one per read, and queues the
/// results for the Recorder to consume.
pub struct BackgroundReader {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundReader {
    /// Start reading from `device` on a background thread. `chunk_bytes` is
    /// the size of each read; `ring_buffers` is both the number of reusable
    /// read buffers and the depth of the handoff queue before the oldest
    /// unconsumed chunk is evicted.
    pub fn spawn<R>(mut device: R, chunk_bytes: usize, ring_buffers: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(ring_buffers)),
            condvar: Condvar::new(),
            evicted: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });
        let worker_shared = shared.clone();

        let handle = thread::spawn(move || {
            let mut buffers: Vec<Vec<u8>> =
                (0..ring_buffers).map(|_| vec![0u8; chunk_bytes]).collect();
            let mut i = 0;

            while worker_shared.running.load(Ordering::Relaxed) {
                let buf = &mut buffers[i];
                let read_started_at = Instant::now();
                match device.read(buf) {
                    Ok(0) => {
                        log::info!("background reader: device closed, stopping");
                        break;
                    }
                    Ok(n) => {
                        let read_finished_at = Instant::now();
                        let chunk = RawChunk {
                            data: buf[..n].to_vec(),
                            read_started_at,
                            read_finished_at,
                        };

                        let mut queue = worker_shared.queue.lock().unwrap();
                        if queue.len() == ring_buffers {
                            queue.pop_front();
                            worker_shared.evicted.fetch_add(1, Ordering::Relaxed);
                        }
                        queue.push_back(chunk);
                        worker_shared.condvar.notify_all();
                    }
                    Err(e) => {
                        log::warn!("background reader: read error: {e}");
                        break;
                    }
                }

                i = (i + 1) % ring_buffers;
            }

            worker_shared.running.store(false, Ordering::Relaxed);
            worker_shared.condvar.notify_all();
        });

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Block until at least one chunk is available or `timeout` elapses,
    /// then drain and return everything currently queued.
    pub fn drain_wait(&self, timeout: Duration) -> Vec<RawChunk> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.is_empty() {
            let (guard, _) = self
                .shared
                .condvar
                .wait_timeout_while(queue, timeout, |q| {
                    q.is_empty() && self.shared.running.load(Ordering::Relaxed)
                })
                .unwrap();
            queue = guard;
        }
        queue.drain(..).collect()
    }

    /// Number of chunks ever silently dropped to make room for a newer one.
    pub fn evicted(&self) -> u64 {
        self.shared.evicted.load(Ordering::Relaxed)
    }

    /// Whether the background thread is still running (device still open).
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Signal the background thread to stop and wait for it to exit.
    pub fn stop(&self) -> Result<(), BciError> {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.condvar.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle
                .join()
                .map_err(|_| BciError::device("background reader thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_all_bytes_in_order() {
        let data: Vec<u8> = (0..40u8).collect();
        let reader = BackgroundReader::spawn(Cursor::new(data.clone()), 10, 4);

        let mut collected = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while collected.len() < data.len() && Instant::now() < deadline {
            for chunk in reader.drain_wait(Duration::from_millis(100)) {
                collected.extend(chunk.data);
            }
        }

        assert_eq!(collected, data);
    }

    #[test]
    fn eviction_counter_tracks_drop_oldest_backpressure() {
        struct SlowDrip {
            remaining: usize,
        }
        impl Read for SlowDrip {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.remaining == 0 {
                    return Ok(0);
                }
                self.remaining -= 1;
                buf[0] = 1;
                Ok(1)
            }
        }

        let reader = BackgroundReader::spawn(SlowDrip { remaining: 20 }, 1, 2);
        thread::sleep(Duration::from_millis(200));
        let _ = reader.drain_wait(Duration::from_millis(10));
        // With a 2-slot queue and no consumption in between, some chunks were
        // necessarily evicted once the reader outran the queue depth.
        assert!(reader.evicted() <= 20);
    }
}
