//! The Recorder's own settable parameters, common to every device. Each
//! device may additionally accept device-specific parameters, handled by its
//! `DeviceDriver::set_parameter`/`get_parameter`, with untyped `(name,
//! values)` pairs re-architected here as a typed enum per the "Dynamic
//! attribute parameters -> typed option struct" design note.

use crate::error::BciError;
use crate::types::{ChannelSelector, ParamValue, TimingMode};

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderParam {
    BdfFile(String),
    TimingMode(TimingMode),
    BufferSizeSeconds(f64),
    ChannelNames(Vec<String>),
    TargetChannels(Vec<ChannelSelector>),
}

impl RecorderParam {
    /// Parse a `(name, values)` pair into a typed parameter, or `None` if
    /// `name` isn't one of the Recorder's own parameters (the caller should
    /// then try the device-specific parameter set).
    pub fn parse(name: &str, values: &[ParamValue]) -> Result<Option<Self>, BciError> {
        match name {
            "bdf_file" => {
                let path = values
                    .first()
                    .ok_or_else(|| BciError::device("invalid value for BDF file"))?
                    .as_str()?;
                Ok(Some(RecorderParam::BdfFile(path.to_string())))
            }
            "timing_mode" => {
                let raw = values
                    .first()
                    .ok_or_else(|| BciError::device("missing value for timing_mode"))?
                    .as_str()?;
                let mode = TimingMode::parse(raw)
                    .ok_or_else(|| BciError::device("invalid timing_mode for device"))?;
                Ok(Some(RecorderParam::TimingMode(mode)))
            }
            "buffer_size_seconds" => {
                let secs = values
                    .first()
                    .ok_or_else(|| BciError::device("invalid value for buffer size"))?
                    .as_f64()?;
                if secs <= 0.0 {
                    return Err(BciError::device("invalid value for buffer size"));
                }
                Ok(Some(RecorderParam::BufferSizeSeconds(secs)))
            }
            "channel_names" => {
                let mut names = Vec::with_capacity(values.len());
                for v in values {
                    names.push(v.as_str()?.to_string());
                }
                Ok(Some(RecorderParam::ChannelNames(names)))
            }
            "target_channels" => {
                if values.is_empty() {
                    return Err(BciError::device("specify at least one target channel"));
                }
                let mut selectors = Vec::with_capacity(values.len());
                for v in values {
                    let selector = match v {
                        ParamValue::Int(i) => ChannelSelector::Index(*i as usize),
                        ParamValue::Str(name) => ChannelSelector::Name(name.clone()),
                        _ => {
                            return Err(BciError::device(
                                "invalid channel index or name, please use integers or strings",
                            ))
                        }
                    };
                    selectors.push(selector);
                }
                Ok(Some(RecorderParam::TargetChannels(selectors)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timing_mode() {
        let parsed = RecorderParam::parse("timing_mode", &[ParamValue::Str("fixed".to_string())])
            .unwrap()
            .unwrap();
        assert_eq!(parsed, RecorderParam::TimingMode(TimingMode::Fixed));
    }

    #[test]
    fn rejects_unknown_timing_mode() {
        let err = RecorderParam::parse("timing_mode", &[ParamValue::Str("bogus".to_string())]).unwrap_err();
        assert_eq!(err.code(), 0);
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(RecorderParam::parse("not_a_param", &[]).unwrap().is_none());
    }
}
