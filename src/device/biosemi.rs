//! Biosemi-like device: a TCP-attached amplifier that reports its own
//! markers in-band via a hardware trigger line rather than through the
//! Recorder's pending-marker queue. The exact trigger-port wire protocol is
//! hardware-specific and out of scope for this server (see PURPOSE & SCOPE);
//! `write_marker` here logs the intended write rather than driving a real
//! port, since no trigger-line crate is part of this server's dependency
//! stack.

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use crate::error::BciError;
use crate::types::ParamValue;

use super::{DeviceDriver, Frame};

const SYNC_BYTE: u8 = 0x55;

pub struct Biosemi {
    host: String,
    data_port: u16,
    sample_rate: f64,
    nchannels: usize,
    channel_names: Vec<String>,
    trigger_port: Option<String>,
    status_as_markers: bool,
    reference_channels: Vec<usize>,
    running: bool,
}

impl Biosemi {
    pub fn new(host: impl Into<String>, data_port: u16, sample_rate: f64, nchannels: usize) -> Self {
        Self {
            host: host.into(),
            data_port,
            sample_rate,
            nchannels,
            channel_names: (0..nchannels).map(|x| format!("A{}", x + 1)).collect(),
            trigger_port: None,
            status_as_markers: true,
            reference_channels: Vec::new(),
            running: false,
        }
    }

    fn frame_size_for(nchannels: usize) -> usize {
        2 + nchannels * 3 + 2
    }
}

impl DeviceDriver for Biosemi {
    fn open(&mut self) -> Result<Box<dyn Read + Send>, BciError> {
        let stream = TcpStream::connect((self.host.as_str(), self.data_port))
            .map_err(|source| BciError::io(source, format!("connecting to biosemi at {}:{}", self.host, self.data_port)))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .map_err(|source| BciError::io(source, "setting biosemi read timeout"))?;
        self.running = true;
        Ok(Box::new(stream))
    }

    fn close(&mut self) -> Result<(), BciError> {
        self.running = false;
        Ok(())
    }

    fn frame_size(&self) -> usize {
        Self::frame_size_for(self.nchannels)
    }

    fn decode_frame(&self, raw: &[u8]) -> Option<Frame> {
        if raw.len() < self.frame_size() || raw[0] != SYNC_BYTE {
            return None;
        }
        let seq = raw[1] as u32;
        let mut channels = Vec::with_capacity(self.nchannels);
        for c in 0..self.nchannels {
            let off = 2 + c * 3;
            let sample = i32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], 0]);
            // sign-extend a 24-bit value
            let sample = (sample << 8) >> 8;
            channels.push(sample);
        }
        let status_off = 2 + self.nchannels * 3;
        let status = i16::from_le_bytes([raw[status_off], raw[status_off + 1]]) as i32;
        Some(Frame { seq, channels, status })
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
        -262144.0
    }

    fn physical_max(&self) -> f64 {
        262143.0
    }

    fn digital_min(&self) -> i32 {
        -8388608
    }

    fn digital_max(&self) -> i32 {
        8388607
    }

    fn calibration_time_secs(&self) -> f64 {
        10.0
    }

    fn status_as_markers(&self) -> bool {
        self.status_as_markers
    }

    fn reference_channels(&self) -> Vec<usize> {
        self.reference_channels.clone()
    }

    fn write_marker(&mut self, code: i32, clear: bool) -> Result<(), BciError> {
        let port = self.trigger_port.as_deref().unwrap_or("<unset>");
        if clear {
            log::info!("biosemi trigger port {port}: clear");
        } else {
            log::info!("biosemi trigger port {port}: write code {code}");
        }
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[ParamValue]) -> Result<bool, BciError> {
        match name {
            "port" => {
                let port = values
                    .first()
                    .ok_or_else(|| BciError::device("missing value for port"))?
                    .as_str()?;
                self.trigger_port = Some(port.to_string());
                Ok(true)
            }
            "status_as_markers" => {
                self.status_as_markers = values
                    .first()
                    .ok_or_else(|| BciError::device("missing value for status_as_markers"))?
                    .as_bool()?;
                Ok(true)
            }
            "reference_channels" => {
                let mut resolved = Vec::with_capacity(values.len());
                for v in values {
                    let idx = match v {
                        ParamValue::Int(i) => *i as usize,
                        ParamValue::Str(name) => self
                            .channel_names
                            .iter()
                            .position(|l| l == name)
                            .ok_or_else(|| BciError::device(format!("channel {name} is not a valid channel for this device")))?,
                        _ => return Err(BciError::device("invalid reference channel value")),
                    };
                    resolved.push(idx);
                }
                self.reference_channels = resolved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        match name {
            "port" => self.trigger_port.clone().map(ParamValue::Str),
            "status_as_markers" => Some(ParamValue::Bool(self.status_as_markers)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_24_bit_signed_samples() {
        let biosemi = Biosemi::new("127.0.0.1", 8888, 2048.0, 1);
        let mut raw = vec![SYNC_BYTE, 0];
        // -1 as 24-bit little-endian
        raw.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        raw.extend_from_slice(&0i16.to_le_bytes());

        let frame = biosemi.decode_frame(&raw).unwrap();
        assert_eq!(frame.channels, vec![-1]);
    }

    #[test]
    fn reference_channels_resolve_by_name() {
        let mut biosemi = Biosemi::new("127.0.0.1", 8888, 2048.0, 4);
        biosemi
            .set_parameter("reference_channels", &[ParamValue::Str("A2".to_string())])
            .unwrap();
        assert_eq!(biosemi.reference_channels, vec![1]);
    }
}
