//! Device driver trait and the devices built into this server.
//!
//! A `DeviceDriver` is the Recorder's only contact with hardware: it opens a
//! byte stream, reports its own framing and calibration constants, and
//! (optionally) exposes a hardware trigger line for marker placement that
//! bypasses the Recorder's own marker queue entirely.

mod biosemi;
mod emulator;

pub use biosemi::Biosemi;
pub use emulator::Emulator;

use crate::error::BciError;
use crate::types::ParamValue;
use std::io::Read;

/// One fixed-size wire frame: a sequence number and the raw per-channel
/// readings plus an in-band status/marker word, as produced by
/// `DeviceDriver::decode_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub channels: Vec<i32>,
    pub status: i32,
}

/// A hardware adapter the Recorder drives. Implementors own the raw byte
/// source (`Read`) and know how to cut it into frames; everything above
/// framing (buffering, timestamping, marker overlay) is the Recorder's job.
pub trait DeviceDriver: Send {
    /// Open the device and return a byte source the BackgroundReader will
    /// poll. Implementations that need a warm-up period report it via
    /// `calibration_time_secs`.
    fn open(&mut self) -> Result<Box<dyn Read + Send>, BciError>;

    /// Release any device resources. Called once, after the background
    /// reader and decoder threads have already stopped.
    fn close(&mut self) -> Result<(), BciError>;

    /// Number of bytes that make up one frame (one sample per channel plus
    /// framing overhead). The Recorder decode loop uses this to find frame
    /// boundaries in a byte stream that may split a frame across two reads.
    fn frame_size(&self) -> usize;

    /// Decode one frame's raw bytes (exactly `frame_size()` long, already
    /// validated to start on a sync byte) into a sequence number and sample
    /// values.
    fn decode_frame(&self, raw: &[u8]) -> Option<Frame>;

    /// The sync byte frames begin with, used by the decoder to resynchronize
    /// after a framing error.
    fn sync_byte(&self) -> u8;

    fn sample_rate(&self) -> f64;
    fn nchannels(&self) -> usize;
    fn channel_labels(&self) -> Vec<String>;
    fn physical_min(&self) -> f64;
    fn physical_max(&self) -> f64;
    fn digital_min(&self) -> i32;
    fn digital_max(&self) -> i32;
    fn calibration_time_secs(&self) -> f64;

    fn gain(&self) -> f64 {
        (self.physical_max() - self.physical_min())
            / (self.digital_max() - self.digital_min()) as f64
    }

    /// Whether this device marks samples by writing to a hardware trigger
    /// line rather than through the Recorder's own pending-marker queue.
    fn status_as_markers(&self) -> bool {
        false
    }

    /// Raise (and, for `trigger` markers, later clear) the hardware trigger
    /// line. Only meaningful when `status_as_markers()` is true.
    fn write_marker(&mut self, _code: i32, _clear: bool) -> Result<(), BciError> {
        Err(BciError::device("this device has no hardware trigger line"))
    }

    /// Channel indices whose mean should be subtracted from every other
    /// channel before markers are overlaid. Empty unless the device
    /// supports a `reference_channels` parameter.
    fn reference_channels(&self) -> Vec<usize> {
        Vec::new()
    }

    fn set_parameter(&mut self, name: &str, values: &[ParamValue]) -> Result<bool, BciError>;
    fn get_parameter(&self, name: &str) -> Option<ParamValue>;
}
