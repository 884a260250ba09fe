//! Recorder: owns a device and its BackgroundReader, decodes raw bytes into
//! timestamped sample chunks, overlays markers, optionally mirrors to a BDF
//! dump, and exposes a blocking consumer interface to the Classifier.

pub mod bdf;
mod decode;
mod markers;
mod param;
mod timing;

pub use markers::MarkerLogEntry;
pub use param::RecorderParam;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::background_reader::BackgroundReader;
use crate::device::DeviceDriver;
use crate::error::BciError;
use crate::logger::Logger;
use crate::sink::EventSink;
use crate::types::{ChannelSelector, Marker, MarkerKind, ParamValue, Sample, TimingMode};

use bdf::BdfWriter;
use decode::Decoder;
use markers::MarkerQueue;
use timing::TimingEstimator;

struct SharedState {
    data: Mutex<Option<Sample>>,
    data_condvar: Condvar,
    running: AtomicBool,
    capture_enabled: AtomicBool,
    calibrated: Mutex<bool>,
    calibrated_condvar: Condvar,
}

impl SharedState {
    fn new() -> Self {
        Self {
            data: Mutex::new(None),
            data_condvar: Condvar::new(),
            running: AtomicBool::new(false),
            capture_enabled: AtomicBool::new(false),
            calibrated: Mutex::new(false),
            calibrated_condvar: Condvar::new(),
        }
    }

    fn set_calibrated(&self) {
        *self.calibrated.lock().unwrap() = true;
        self.calibrated_condvar.notify_all();
    }

    fn wait_calibrated(&self) {
        let mut guard = self.calibrated.lock().unwrap();
        while !*guard && self.running.load(Ordering::Relaxed) {
            guard = self.calibrated_condvar.wait(guard).unwrap();
        }
    }

    fn push_data(&self, chunk: Sample) {
        let mut data = self.data.lock().unwrap();
        match data.as_mut() {
            Some(existing) => existing.extend(chunk),
            None => *data = Some(chunk),
        }
        self.data_condvar.notify_all();
    }
}

/// Mutable settings that both the calling thread (via `set_parameter`) and
/// the decoder thread (on every chunk) need to see, guarded together since
/// they change together rarely and are read together every chunk.
struct RecorderSettings {
    timing_mode: TimingMode,
    buffer_size_seconds: f64,
    channel_names: Vec<String>,
    target_channels: Vec<usize>,
    bdf_file: Option<String>,
}

pub struct Recorder {
    device: Arc<Mutex<Box<dyn DeviceDriver>>>,
    marker_queue: Arc<MarkerQueue>,
    shared: Arc<SharedState>,
    settings: Arc<Mutex<RecorderSettings>>,
    sink: EventSink,
    background: Mutex<Option<Arc<BackgroundReader>>>,
    decoder_thread: Mutex<Option<JoinHandle<()>>>,
    ring_buffers: usize,
    ring_buffer_bytes: usize,
    log_path: PathBuf,
    diagnostic_logging: bool,
}

impl Recorder {
    pub fn new(
        device: Box<dyn DeviceDriver>,
        sink: EventSink,
        ring_buffers: usize,
        ring_buffer_bytes: usize,
        default_timing_mode: TimingMode,
        default_buffer_size_seconds: f64,
        log_path: PathBuf,
        diagnostic_logging: bool,
    ) -> Self {
        let labels = device.channel_labels();
        let target_channels = (0..labels.len()).collect();
        Self {
            device: Arc::new(Mutex::new(device)),
            marker_queue: Arc::new(MarkerQueue::new()),
            shared: Arc::new(SharedState::new()),
            settings: Arc::new(Mutex::new(RecorderSettings {
                timing_mode: default_timing_mode,
                buffer_size_seconds: default_buffer_size_seconds,
                channel_names: labels,
                target_channels,
                bdf_file: None,
            })),
            sink,
            background: Mutex::new(None),
            decoder_thread: Mutex::new(None),
            ring_buffers,
            ring_buffer_bytes,
            log_path,
            diagnostic_logging,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Opens the device, establishes `T0`, and starts the BackgroundReader
    /// and decoder thread.
    pub fn start(&self) -> Result<(), BciError> {
        if self.is_running() {
            return Ok(());
        }

        let stream = {
            let mut device = self.device.lock().unwrap();
            device.open()?
        };

        // Markers carry wall-clock epoch timestamps (submitted by the client,
        // or stamped at dispatch time), so T0 must live on the same clock
        // rather than on `Instant`'s unspecified monotonic origin.
        let t0 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let t0_instant = Instant::now();

        let background = Arc::new(BackgroundReader::spawn(stream, self.ring_buffer_bytes, self.ring_buffers));
        *self.background.lock().unwrap() = Some(background.clone());
        self.shared.running.store(true, Ordering::Relaxed);

        let device = self.device.clone();
        let marker_queue = self.marker_queue.clone();
        let shared = self.shared.clone();
        let settings = self.settings.clone();
        let sink = self.sink.clone();
        let log_path = self.log_path.clone();
        let diagnostic_logging = self.diagnostic_logging;
        let calibration_time_secs = self.device.lock().unwrap().calibration_time_secs();

        let handle = thread::spawn(move || {
            decoder_loop(
                device,
                background,
                marker_queue,
                shared,
                settings,
                sink,
                t0,
                t0_instant,
                calibration_time_secs,
                log_path,
                diagnostic_logging,
            )
        });
        *self.decoder_thread.lock().unwrap() = Some(handle);

        Ok(())
    }

    pub fn start_capture(&self) {
        self.shared.capture_enabled.store(true, Ordering::Relaxed);
    }

    pub fn stop_capture(&self) {
        self.shared.capture_enabled.store(false, Ordering::Relaxed);
    }

    pub fn wait_calibrated(&self) {
        self.shared.wait_calibrated();
    }

    /// Returns all samples accumulated since the last read. Blocks until
    /// data arrives (or the recorder stops) when `block` is true.
    pub fn read(&self, block: bool, flush: bool) -> Option<Sample> {
        let mut data = self.shared.data.lock().unwrap();
        if block {
            while data.is_none() && self.shared.running.load(Ordering::Relaxed) {
                data = self.shared.data_condvar.wait(data).unwrap();
            }
        }

        let result = data.clone();
        if flush {
            *data = None;
        }
        result
    }

    pub fn flush(&self) {
        *self.shared.data.lock().unwrap() = None;
    }

    /// Enqueues a marker, or for devices that mark in hardware, writes
    /// directly to the trigger line instead of touching the pending-marker
    /// queue. `received_at` is always the wall-clock time at the moment this
    /// call executes, never a once-evaluated default.
    pub fn set_marker(&self, code: i32, kind: MarkerKind, timestamp: f64) -> Result<(), BciError> {
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let mut device = self.device.lock().unwrap();
        if device.status_as_markers() {
            device.write_marker(code, false)?;
            if matches!(kind, MarkerKind::Trigger) {
                thread::sleep(Duration::from_millis(5));
                device.write_marker(code, true)?;
            }
            return Ok(());
        }
        drop(device);

        self.marker_queue.submit(Marker::new(code, kind, timestamp, received_at));
        Ok(())
    }

    pub fn set_parameter(&self, name: &str, values: &[ParamValue]) -> Result<(), BciError> {
        if self.is_running() && matches!(name, "buffer_size_seconds" | "target_channels") {
            return Err(BciError::device(format!(
                "cannot set parameter {name} because the device is already opened"
            )));
        }

        if let Some(param) = RecorderParam::parse(name, values)? {
            let mut settings = self.settings.lock().unwrap();
            match param {
                RecorderParam::BdfFile(path) => settings.bdf_file = Some(path),
                RecorderParam::TimingMode(mode) => settings.timing_mode = mode,
                RecorderParam::BufferSizeSeconds(secs) => settings.buffer_size_seconds = secs,
                RecorderParam::ChannelNames(names) => {
                    if names.len() != settings.channel_names.len() {
                        return Err(BciError::device(format!(
                            "number of channel names should be equal to number of channels of the device ({})",
                            settings.channel_names.len()
                        )));
                    }
                    settings.channel_names = names;
                }
                RecorderParam::TargetChannels(selectors) => {
                    let mut resolved = Vec::with_capacity(selectors.len());
                    for selector in selectors {
                        resolved.push(selector.resolve(&settings.channel_names)?);
                    }
                    settings.target_channels = resolved;
                }
            }
            return Ok(());
        }

        if self.device.lock().unwrap().set_parameter(name, values)? {
            return Ok(());
        }

        Err(BciError::device("unknown device parameter"))
    }

    pub fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        let settings = self.settings.lock().unwrap();
        match name {
            "bdf_file" => Some(ParamValue::Str(settings.bdf_file.clone().unwrap_or_else(|| "<none>".to_string()))),
            "timing_mode" => Some(ParamValue::Str(settings.timing_mode.as_str().to_string())),
            "buffer_size_seconds" => Some(ParamValue::Float(settings.buffer_size_seconds)),
            "channel_names" => Some(ParamValue::List(
                settings.channel_names.iter().cloned().map(ParamValue::Str).collect(),
            )),
            "target_channels" => Some(ParamValue::List(
                settings.target_channels.iter().map(|&i| ParamValue::Int(i as i64)).collect(),
            )),
            "nchannels" => Some(ParamValue::Int(settings.target_channels.len() as i64)),
            _ => {
                drop(settings);
                self.device.lock().unwrap().get_parameter(name)
            }
        }
    }

    /// Resolve a channel selector (index or name) against the current
    /// channel names.
    pub fn resolve_channel(&self, selector: &ChannelSelector) -> Result<usize, BciError> {
        let settings = self.settings.lock().unwrap();
        selector.resolve(&settings.channel_names)
    }

    /// Shuts down decoder, reader, BDF writer and device, in that order.
    /// Idempotent.
    pub fn stop(&self) -> Result<(), BciError> {
        if !self.is_running() {
            return Ok(());
        }

        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.data_condvar.notify_all();
        self.shared.calibrated_condvar.notify_all();

        if let Some(background) = self.background.lock().unwrap().take() {
            background.stop()?;
        }
        if let Some(handle) = self.decoder_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        self.device.lock().unwrap().close()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn decoder_loop(
    device: Arc<Mutex<Box<dyn DeviceDriver>>>,
    background: Arc<BackgroundReader>,
    marker_queue: Arc<MarkerQueue>,
    shared: Arc<SharedState>,
    settings: Arc<Mutex<RecorderSettings>>,
    sink: EventSink,
    t0: f64,
    t0_instant: Instant,
    calibration_time_secs: f64,
    log_path: PathBuf,
    diagnostic_logging: bool,
) {
    let (nominal_rate, device_nchannels, reference_channels, gain, physical_min) = {
        let device = device.lock().unwrap();
        (
            device.sample_rate(),
            device.nchannels(),
            device.reference_channels(),
            device.gain(),
            device.physical_min(),
        )
    };

    let buffer_size_seconds = settings.lock().unwrap().buffer_size_seconds;
    let mut decoder = Decoder::new();
    let mut timing = TimingEstimator::new(TimingMode::default(), nominal_rate, buffer_size_seconds, t0_instant);
    let mut bdf_writer: Option<BdfWriter> = None;
    let mut marker_log: Option<Logger<MarkerLogEntry>> = if diagnostic_logging {
        Some(Logger::new(log_path.join("markers.log.jsonl"), 50))
    } else {
        None
    };

    while shared.running.load(Ordering::Relaxed) {
        let chunks = background.drain_wait(Duration::from_millis(500));
        if chunks.is_empty() {
            if !background.is_running() && shared.running.load(Ordering::Relaxed) {
                log::error!("device stream ended unexpectedly, stopping recorder");
                sink.error(BciError::device("device stream ended unexpectedly"));
                shared.running.store(false, Ordering::Relaxed);
                shared.data_condvar.notify_all();
                shared.calibrated_condvar.notify_all();
                break;
            }
            continue;
        }

        for raw_chunk in chunks {
            let device_guard = device.lock().unwrap();
            let block = decoder.decode(&raw_chunk.data, device_guard.as_ref());
            drop(device_guard);

            let Some(block) = block else { continue };
            let nsamples = block.status.len();
            if nsamples == 0 {
                continue;
            }

            let (timing_mode, target_channels, bdf_file) = {
                let s = settings.lock().unwrap();
                (s.timing_mode, s.target_channels.clone(), s.bdf_file.clone())
            };
            timing.set_mode(timing_mode);

            let result = timing.estimate(nsamples, raw_chunk.read_started_at, raw_chunk.read_finished_at);
            log::debug!(
                "decoded chunk: {} samples, drift={:.4}, est_rate={:.2}",
                nsamples,
                result.drift,
                result.estimated_sample_rate
            );

            match bdf_file {
                Some(path) if bdf_writer.is_none() => {
                    let labels = settings.lock().unwrap().channel_names.clone();
                    match BdfWriter::create(&path, device_nchannels, nominal_rate, &labels) {
                        Ok(writer) => bdf_writer = Some(writer),
                        Err(e) => log::error!("failed to open BDF dump: {e}"),
                    }
                }
                None => bdf_writer = None,
                _ => {}
            }

            if let Some(writer) = bdf_writer.as_mut() {
                let raw_samples: Vec<i32> = block.samples.iter().copied().collect();
                if let Err(e) = writer.write_chunk(&raw_samples, &block.status) {
                    log::error!("failed writing BDF chunk: {e}");
                }
            }

            let status = marker_queue.apply(&result.timestamps, t0, marker_log.as_mut());

            if !shared_is_calibrated(&shared) && result.timestamps.last().copied().unwrap_or(0.0) > calibration_time_secs {
                shared.set_calibrated();
            }

            if shared.capture_enabled.load(Ordering::Relaxed) {
                // Subtract the reference mean before selecting target
                // channels, since a reference channel may itself be dropped
                // from the output.
                let reference_mean = if reference_channels.is_empty() {
                    vec![0.0; nsamples]
                } else {
                    let mut mean = vec![0.0f64; nsamples];
                    for &row in &reference_channels {
                        if row < block.samples.nrows() {
                            for col in 0..nsamples {
                                mean[col] += block.samples[[row, col]] as f64;
                            }
                        }
                    }
                    for m in mean.iter_mut() {
                        *m /= reference_channels.len() as f64;
                    }
                    mean
                };

                let nselected = target_channels.len();
                let mut selected = ndarray::Array2::<i32>::zeros((nselected, nsamples));
                for (out_row, &src_row) in target_channels.iter().enumerate() {
                    if src_row < block.samples.nrows() {
                        for col in 0..nsamples {
                            let raw = block.samples[[src_row, col]] as f64 - reference_mean[col];
                            selected[[out_row, col]] = raw.round() as i32;
                        }
                    }
                }

                let labels = {
                    let all_labels = settings.lock().unwrap().channel_names.clone();
                    target_channels
                        .iter()
                        .map(|&i| all_labels.get(i).cloned().unwrap_or_default())
                        .collect()
                };
                let chunk = Sample {
                    samples: Sample::to_physical(&selected, gain, physical_min),
                    status,
                    timestamps: result.timestamps,
                    labels,
                };
                shared.push_data(chunk);
            }
        }
    }
}

fn shared_is_calibrated(shared: &SharedState) -> bool {
    *shared.calibrated.lock().unwrap()
}
