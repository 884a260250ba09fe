//! Turns a byte stream into a sequence of device frames: finds frame
//! boundaries by sync byte, carries a trailing partial frame across chunk
//! boundaries, and repairs small sequence-number gaps by linear
//! interpolation (§4.2.3).

use ndarray::Array2;

use crate::device::{DeviceDriver, Frame};

/// Frame gaps larger than this are zero-filled instead of interpolated,
/// since interpolating across a long dropout would fabricate signal.
const MAX_INTERPOLATION_GAP: u32 = 10;

pub struct DecodedBlock {
    pub samples: Array2<i32>,
    pub status: Vec<i32>,
}

pub struct Decoder {
    scratch: Vec<u8>,
    last_seq: Option<u8>,
    last_channels: Option<Vec<i32>>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
            last_seq: None,
            last_channels: None,
        }
    }

    /// Decode one record of freshly-read bytes into complete frames,
    /// carrying over any trailing partial frame for the next call.
    fn split_frames(&mut self, raw: &[u8], device: &dyn DeviceDriver) -> Vec<Frame> {
        let mut buf = std::mem::take(&mut self.scratch);
        buf.extend_from_slice(raw);

        let frame_size = device.frame_size();
        let sync = device.sync_byte();
        let mut frames = Vec::new();
        let mut idx = 0;

        while idx + frame_size <= buf.len() {
            if buf[idx] != sync {
                let start = idx;
                idx += 1;
                while idx < buf.len() && buf[idx] != sync {
                    idx += 1;
                }
                log::warn!("frame sync lost, dropped {} bytes resynchronizing", idx - start);
                continue;
            }

            match device.decode_frame(&buf[idx..idx + frame_size]) {
                Some(frame) => {
                    frames.push(frame);
                    idx += frame_size;
                }
                None => idx += 1,
            }
        }

        self.scratch = buf[idx..].to_vec();
        frames
    }

    /// Resolve sequence-number gaps and duplicates in a run of frames,
    /// producing the final per-sample channel/status rows.
    fn resolve_sequence(&mut self, frames: Vec<Frame>, nchannels: usize) -> (Vec<Vec<i32>>, Vec<i32>) {
        let mut channels_rows = Vec::with_capacity(frames.len());
        let mut status_rows = Vec::with_capacity(frames.len());

        for frame in frames {
            let seq = frame.seq as u8;

            if let Some(last_seq) = self.last_seq {
                if seq == last_seq {
                    log::warn!("duplicate frame seq {seq}, discarding");
                    continue;
                }

                let gap = seq.wrapping_sub(last_seq).wrapping_sub(1) as u32;
                if gap > 0 {
                    if gap <= MAX_INTERPOLATION_GAP {
                        log::warn!("{gap} dropped frame(s) detected (seq {last_seq} -> {seq}), interpolating");
                        if let Some(last) = &self.last_channels {
                            for step in 1..=gap {
                                let t = step as f64 / (gap + 1) as f64;
                                let interpolated: Vec<i32> = last
                                    .iter()
                                    .zip(frame.channels.iter())
                                    .map(|(&a, &b)| (a as f64 + (b as f64 - a as f64) * t).round() as i32)
                                    .collect();
                                channels_rows.push(interpolated);
                                status_rows.push(0);
                            }
                        }
                    } else {
                        log::warn!("{gap} dropped frames exceeds interpolation cap, zero-filling");
                        for _ in 0..gap {
                            channels_rows.push(vec![0; nchannels]);
                            status_rows.push(0);
                        }
                    }
                }
            }

            self.last_seq = Some(seq);
            self.last_channels = Some(frame.channels.clone());
            channels_rows.push(frame.channels);
            status_rows.push(frame.status);
        }

        (channels_rows, status_rows)
    }

    /// Decode one raw record into a channel-major sample block plus status
    /// vector; `None` if the record yielded no complete frames.
    pub fn decode(&mut self, raw: &[u8], device: &dyn DeviceDriver) -> Option<DecodedBlock> {
        let frames = self.split_frames(raw, device);
        if frames.is_empty() {
            return None;
        }

        let nchannels = device.nchannels();
        let (channels_rows, status) = self.resolve_sequence(frames, nchannels);
        if channels_rows.is_empty() {
            return None;
        }

        let ninstances = channels_rows.len();
        let mut samples = Array2::zeros((nchannels, ninstances));
        for (col, row) in channels_rows.iter().enumerate() {
            for (ch, &value) in row.iter().enumerate() {
                samples[[ch, col]] = value;
            }
        }

        Some(DecodedBlock { samples, status })
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Emulator;

    fn frame_bytes(seq: u8, nchannels: usize, value: i16) -> Vec<u8> {
        let mut buf = vec![0xAAu8, seq];
        for _ in 0..nchannels {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf.extend_from_slice(&0i16.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_consecutive_frames() {
        let device = Emulator::new(1000.0, 2);
        let mut decoder = Decoder::new();
        let mut raw = Vec::new();
        raw.extend(frame_bytes(0, 2, 10));
        raw.extend(frame_bytes(1, 2, 20));

        let block = decoder.decode(&raw, &device).unwrap();
        assert_eq!(block.samples.shape(), &[2, 2]);
        assert_eq!(block.status, vec![0, 0]);
    }

    #[test]
    fn carries_partial_trailing_frame_across_calls() {
        let device = Emulator::new(1000.0, 2);
        let mut decoder = Decoder::new();
        let full = frame_bytes(0, 2, 5);
        let (head, tail) = full.split_at(4);

        assert!(decoder.decode(head, &device).is_none());
        let block = decoder.decode(tail, &device).unwrap();
        assert_eq!(block.samples.shape(), &[2, 1]);
    }

    #[test]
    fn interpolates_across_a_single_dropped_frame() {
        let device = Emulator::new(1000.0, 1);
        let mut decoder = Decoder::new();
        let mut raw = Vec::new();
        raw.extend(frame_bytes(0, 1, 0));
        raw.extend(frame_bytes(2, 1, 10));

        let block = decoder.decode(&raw, &device).unwrap();
        // frame 0, interpolated frame (seq 1 missing), frame 2
        assert_eq!(block.samples.shape(), &[1, 3]);
        assert_eq!(block.samples[[0, 1]], 5);
    }
}
