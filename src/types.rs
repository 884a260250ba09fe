use crate::error::BciError;
use serde::{Deserialize, Serialize};

/// A loosely-typed value produced by the protocol tokenizer and consumed by
/// parameter setters. Each component (`RecorderParam`, a device's own param
/// enum, a classifier plugin's param enum) is responsible for converting a
/// name plus a slice of these into its own strongly-typed representation --
/// see the "Dynamic attribute parameters -> typed option struct" design note.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Result<&str, BciError> {
        match self {
            ParamValue::Str(s) => Ok(s),
            _ => Err(BciError::device(format!("expected a string, got {self:?}"))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, BciError> {
        match self {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            _ => Err(BciError::device(format!("expected a number, got {self:?}"))),
        }
    }

    pub fn as_i64(&self) -> Result<i64, BciError> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            _ => Err(BciError::device(format!("expected an integer, got {self:?}"))),
        }
    }

    pub fn as_bool(&self) -> Result<bool, BciError> {
        match self {
            ParamValue::Bool(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v != 0),
            _ => Err(BciError::device(format!("expected a boolean, got {self:?}"))),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(v: Vec<ParamValue>) -> Self {
        ParamValue::List(v)
    }
}

/// One of the two marker kinds: `Trigger` marks exactly one sample,
/// `Switch` marks that sample and every subsequent one until the next switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Trigger,
    Switch,
}

impl MarkerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trigger" => Some(MarkerKind::Trigger),
            "switch" => Some(MarkerKind::Switch),
            _ => None,
        }
    }
}

/// A marker submitted by the client: a code to stamp into the status
/// channel, the kind of stamping to perform, the timestamp (seconds since
/// epoch) at which it should apply, and the timestamp at which the server
/// actually received it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub code: i32,
    pub kind: MarkerKind,
    pub timestamp: f64,
    pub received_at: f64,
}

impl Marker {
    pub fn new(code: i32, kind: MarkerKind, timestamp: f64, received_at: f64) -> Self {
        Self {
            code,
            kind,
            timestamp,
            received_at,
        }
    }
}

/// A channel reference by zero-based index or by label; resolved against a
/// device's channel name list when a parameter is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSelector {
    Index(usize),
    Name(String),
}

impl ChannelSelector {
    pub fn resolve(&self, labels: &[String]) -> Result<usize, BciError> {
        match self {
            ChannelSelector::Index(i) => {
                if *i < labels.len() {
                    Ok(*i)
                } else {
                    Err(BciError::device(format!(
                        "channel index {i} out of range (device has {} channels)",
                        labels.len()
                    )))
                }
            }
            ChannelSelector::Name(name) => labels.iter().position(|l| l == name).ok_or_else(|| {
                BciError::device(format!("channel {name} is not a valid channel for this device"))
            }),
        }
    }
}

/// One of the five timestamp-estimation strategies of §4.2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    Fixed,
    EndReadRelative,
    BeginReadRelative,
    EstimatedSampleRate,
    SmoothedSampleRate,
}

impl TimingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Some(TimingMode::Fixed),
            "end_read_relative" => Some(TimingMode::EndReadRelative),
            "begin_read_relative" => Some(TimingMode::BeginReadRelative),
            "estimated_sample_rate" => Some(TimingMode::EstimatedSampleRate),
            "smoothed_sample_rate" => Some(TimingMode::SmoothedSampleRate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimingMode::Fixed => "fixed",
            TimingMode::EndReadRelative => "end_read_relative",
            TimingMode::BeginReadRelative => "begin_read_relative",
            TimingMode::EstimatedSampleRate => "estimated_sample_rate",
            TimingMode::SmoothedSampleRate => "smoothed_sample_rate",
        }
    }
}

impl Default for TimingMode {
    fn default() -> Self {
        TimingMode::BeginReadRelative
    }
}

/// A decoded, timestamped chunk of samples: an `(nchannels x N)` matrix of
/// physical-unit readings (gain and offset already applied), a `(1 x N)`
/// status/marker vector, and a `(1 x N)` vector of timestamps relative to
/// the recorder's `T0`.
///
/// Invariant: `timestamps` is strictly increasing, and `samples.ncols() ==
/// timestamps.len() == status.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub samples: ndarray::Array2<f64>,
    pub status: Vec<i32>,
    pub timestamps: Vec<f64>,
    pub labels: Vec<String>,
}

impl Sample {
    pub fn ninstances(&self) -> usize {
        self.timestamps.len()
    }

    pub fn nchannels(&self) -> usize {
        self.samples.nrows()
    }

    /// Append another chunk to this one, in place. Used by the Recorder's
    /// consumer buffer, which accumulates chunks between `read()` calls.
    pub fn extend(&mut self, other: Sample) {
        debug_assert_eq!(self.nchannels(), other.nchannels());
        self.status.extend(other.status);
        self.timestamps.extend(other.timestamps);
        self.samples = ndarray::concatenate(
            ndarray::Axis(1),
            &[self.samples.view(), other.samples.view()],
        )
        .expect("chunk channel counts must agree");
    }

    /// Converts a raw integer block to physical units:
    /// `x_physical = x_raw * gain + physical_min`.
    pub fn to_physical(raw: &ndarray::Array2<i32>, gain: f64, physical_min: f64) -> ndarray::Array2<f64> {
        raw.mapv(|v| v as f64 * gain + physical_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_selector_resolves_name_and_index() {
        let labels = vec!["Fp1".to_string(), "Fp2".to_string(), "Oz".to_string()];
        assert_eq!(
            ChannelSelector::Name("Oz".to_string()).resolve(&labels).unwrap(),
            2
        );
        assert_eq!(ChannelSelector::Index(1).resolve(&labels).unwrap(), 1);
        assert!(ChannelSelector::Index(5).resolve(&labels).is_err());
        assert!(ChannelSelector::Name("X".to_string()).resolve(&labels).is_err());
    }

    #[test]
    fn timing_mode_round_trips_through_str() {
        for mode in [
            TimingMode::Fixed,
            TimingMode::EndReadRelative,
            TimingMode::BeginReadRelative,
            TimingMode::EstimatedSampleRate,
            TimingMode::SmoothedSampleRate,
        ] {
            assert_eq!(TimingMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn sample_extend_concatenates_along_time_axis() {
        let mut a = Sample {
            samples: ndarray::Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            status: vec![0, 0],
            timestamps: vec![0.0, 0.001],
            labels: vec!["a".into(), "b".into()],
        };
        let b = Sample {
            samples: ndarray::Array2::from_shape_vec((2, 1), vec![5.0, 6.0]).unwrap(),
            status: vec![0],
            timestamps: vec![0.002],
            labels: vec!["a".into(), "b".into()],
        };
        a.extend(b);
        assert_eq!(a.ninstances(), 3);
        assert_eq!(a.samples.shape(), &[2, 3]);
    }

    #[test]
    fn to_physical_applies_gain_and_offset() {
        let raw = ndarray::Array2::from_shape_vec((1, 3), vec![0, 2047, 4094]).unwrap();
        let physical = Sample::to_physical(&raw, 0.3052, -625.0);
        assert!((physical[[0, 0]] - -625.0).abs() < 1e-6);
        assert!((physical[[0, 2]] - 624.9868).abs() < 1e-3);
    }
}
