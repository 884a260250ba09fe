//! Signal generator device, used for development and testing without real
//! hardware. Can optionally play back a previously recorded BDF dump instead
//! of generating random samples.

use std::io::Read;
use std::time::{Duration, Instant};

use crate::error::BciError;
use crate::recorder::bdf::BdfReader;
use crate::types::ParamValue;

use super::{DeviceDriver, Frame};

const SYNC_BYTE: u8 = 0xAA;

pub struct Emulator {
    sample_rate: f64,
    nchannels: usize,
    calibration_time_secs: f64,
    physical_min: f64,
    physical_max: f64,
    digital_min: i32,
    digital_max: i32,
    channel_names: Vec<String>,
    bdf_playback_file: Option<String>,
    running: bool,
}

impl Emulator {
    pub fn new(sample_rate: f64, nchannels: usize) -> Self {
        Self {
            sample_rate,
            nchannels,
            calibration_time_secs: 10.0,
            physical_min: -625.0,
            physical_max: 624.0,
            digital_min: 0,
            digital_max: 4094,
            channel_names: (0..nchannels).map(|x| format!("channel {x:02}")).collect(),
            bdf_playback_file: None,
            running: false,
        }
    }

    fn frame_size_for(nchannels: usize) -> usize {
        // sync byte + seq byte + i16 per channel + i16 status
        2 + nchannels * 2 + 2
    }
}

impl DeviceDriver for Emulator {
    fn open(&mut self) -> Result<Box<dyn Read + Send>, BciError> {
        self.running = true;
        if let Some(path) = self.bdf_playback_file.clone() {
            let reader = BdfReader::open(&path)?;
            self.nchannels = reader.nchannels();
            self.sample_rate = reader.sample_rate();
            self.channel_names = reader.channel_labels();
            Ok(Box::new(reader))
        } else {
            Ok(Box::new(EmulatorStream::new(self.sample_rate, self.nchannels)))
        }
    }

    fn close(&mut self) -> Result<(), BciError> {
        self.running = false;
        Ok(())
    }

    fn frame_size(&self) -> usize {
        Self::frame_size_for(self.nchannels)
    }

    fn decode_frame(&self, raw: &[u8]) -> Option<Frame> {
        decode_frame_bytes(raw, self.nchannels)
    }

    fn sync_byte(&self) -> u8 {
        SYNC_BYTE
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn nchannels(&self) -> usize {
        self.nchannels
    }

    fn channel_labels(&self) -> Vec<String> {
        self.channel_names.clone()
    }

    fn physical_min(&self) -> f64 {
        self.physical_min
    }

    fn physical_max(&self) -> f64 {
        self.physical_max
    }

    fn digital_min(&self) -> i32 {
        self.digital_min
    }

    fn digital_max(&self) -> i32 {
        self.digital_max
    }

    fn calibration_time_secs(&self) -> f64 {
        self.calibration_time_secs
    }

    fn set_parameter(&mut self, name: &str, values: &[ParamValue]) -> Result<bool, BciError> {
        match name {
            "bdf_playback_file" => {
                if self.running {
                    return Err(BciError::device("cannot change parameter: device is already opened"));
                }
                let path = values
                    .first()
                    .ok_or_else(|| BciError::device("invalid value for bdf_playback_file"))?
                    .as_str()?;
                self.bdf_playback_file = Some(path.to_string());
                Ok(true)
            }
            "sample_rate" => {
                if self.bdf_playback_file.is_some() {
                    return Err(BciError::device("cannot change sample rate when reading from BDF file"));
                }
                self.sample_rate = values
                    .first()
                    .ok_or_else(|| BciError::device("invalid value for sample rate"))?
                    .as_f64()?;
                Ok(true)
            }
            "nchannels" => {
                if self.bdf_playback_file.is_some() {
                    return Err(BciError::device("cannot change number of channels when reading from BDF file"));
                }
                let n = values
                    .first()
                    .ok_or_else(|| BciError::device("invalid value for number of channels"))?
                    .as_i64()?;
                if n <= 0 {
                    return Err(BciError::device("invalid value for number of channels"));
                }
                self.nchannels = n as usize;
                self.channel_names = (0..self.nchannels).map(|x| format!("channel {x:02}")).collect();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        match name {
            "bdf_playback_file" => self.bdf_playback_file.clone().map(ParamValue::Str),
            "sample_rate" => Some(ParamValue::Float(self.sample_rate)),
            _ => None,
        }
    }
}

fn decode_frame_bytes(raw: &[u8], nchannels: usize) -> Option<Frame> {
    if raw.len() < 2 + nchannels * 2 + 2 || raw[0] != SYNC_BYTE {
        return None;
    }
    let seq = raw[1] as u32;
    let mut channels = Vec::with_capacity(nchannels);
    for c in 0..nchannels {
        let lo = raw[2 + c * 2];
        let hi = raw[2 + c * 2 + 1];
        channels.push(i16::from_le_bytes([lo, hi]) as i32);
    }
    let status_off = 2 + nchannels * 2;
    let status = i16::from_le_bytes([raw[status_off], raw[status_off + 1]]) as i32;
    Some(Frame { seq, channels, status })
}

/// Generates random frames paced to `sample_rate`, sleeping between chunks
/// so throughput tracks real time instead of running as fast as possible.
struct EmulatorStream {
    sample_rate: f64,
    nchannels: usize,
    digital_min: i32,
    digital_max: i32,
    start: Instant,
    samples_emitted: u64,
    seq: u8,
    rng_state: u64,
}

impl EmulatorStream {
    fn new(sample_rate: f64, nchannels: usize) -> Self {
        Self {
            sample_rate,
            nchannels,
            digital_min: 0,
            digital_max: 4094,
            start: Instant::now(),
            samples_emitted: 0,
            seq: 0,
            rng_state: 0x2545F4914F6CDD1D,
        }
    }

    fn next_rand(&mut self) -> i32 {
        // xorshift64*, fast and dependency-free; sample values are noise, not
        // cryptographically meaningful.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        let span = (self.digital_max - self.digital_min + 1) as u64;
        self.digital_min + (x % span) as i32
    }
}

impl Read for EmulatorStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let frame_size = 2 + self.nchannels * 2 + 2;
        if buf.len() < frame_size {
            return Ok(0);
        }

        let pending = loop {
            let elapsed = self.start.elapsed().as_secs_f64();
            let target = (elapsed * self.sample_rate) as u64;
            let pending = target.saturating_sub(self.samples_emitted);
            if pending > 0 {
                break pending;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        let max_frames = buf.len() / frame_size;
        let n = pending.min(max_frames as u64) as usize;

        for i in 0..n {
            let off = i * frame_size;
            buf[off] = SYNC_BYTE;
            buf[off + 1] = self.seq;
            self.seq = self.seq.wrapping_add(1);
            for c in 0..self.nchannels {
                let v = self.next_rand() as i16;
                let bytes = v.to_le_bytes();
                buf[off + 2 + c * 2] = bytes[0];
                buf[off + 2 + c * 2 + 1] = bytes[1];
            }
            let status_off = off + 2 + self.nchannels * 2;
            buf[status_off] = 0;
            buf[status_off + 1] = 0;
        }

        self.samples_emitted += n as u64;
        Ok(n * frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_well_formed_frame() {
        let mut raw = vec![SYNC_BYTE, 5];
        raw.extend_from_slice(&100i16.to_le_bytes());
        raw.extend_from_slice(&(-50i16).to_le_bytes());
        raw.extend_from_slice(&0i16.to_le_bytes());

        let frame = decode_frame_bytes(&raw, 2).unwrap();
        assert_eq!(frame.seq, 5);
        assert_eq!(frame.channels, vec![100, -50]);
        assert_eq!(frame.status, 0);
    }

    #[test]
    fn rejects_frame_without_sync_byte() {
        let raw = vec![0x00, 5, 0, 0, 0, 0, 0, 0];
        assert!(decode_frame_bytes(&raw, 2).is_none());
    }

    #[test]
    fn emulator_stream_paces_to_sample_rate() {
        let mut stream = EmulatorStream::new(1000.0, 4);
        let frame_size = 2 + 4 * 2 + 2;
        let mut buf = vec![0u8; frame_size * 4];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n % frame_size, 0);
        assert!(n / frame_size <= 4);
    }
}
