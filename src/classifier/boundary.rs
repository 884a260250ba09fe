//! Built-in boundary classifier: classifies one monitored channel as
//! `bad`/`good`/`stable` depending on whether its recent maximum (after
//! dropping the first few samples of each chunk, which tend to be
//! transients) sits within a fixed range, and whether it has stayed there
//! for long enough to call it stable.

use std::collections::VecDeque;

use crate::error::BciError;
use crate::types::{ParamValue, Sample};

use super::{ClassificationResult, ClassifierPlugin, Dataset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Bad,
    Good,
    Stable,
}

impl SignalState {
    fn as_str(&self) -> &'static str {
        match self {
            SignalState::Bad => "bad",
            SignalState::Good => "good",
            SignalState::Stable => "stable",
        }
    }
}

pub struct BoundaryClassifier {
    name: String,
    signal_index: usize,
    min_bound: f64,
    max_bound: f64,
    drop_front: usize,
    buffer_size: usize,
    stable_threshold: u32,
    consecutive_good_count: u32,
    last_classification: Option<SignalState>,
    history: VecDeque<f64>,
}

pub struct BoundaryClassifierBuilder {
    name: String,
    signal_index: Option<usize>,
    min_bound: Option<f64>,
    max_bound: Option<f64>,
    buffer_size: usize,
    drop_front: usize,
    stable_threshold: u32,
}

impl BoundaryClassifier {
    pub fn builder() -> BoundaryClassifierBuilder {
        BoundaryClassifierBuilder {
            name: "boundary".to_string(),
            signal_index: None,
            min_bound: None,
            max_bound: None,
            buffer_size: 10,
            drop_front: 2,
            stable_threshold: 3,
        }
    }

    fn max_after_drop(&self) -> Option<f64> {
        if self.history.len() <= self.drop_front {
            return None;
        }
        self.history
            .iter()
            .skip(self.drop_front)
            .copied()
            .fold(None, |acc, v| match acc {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }

    fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min_bound && value <= self.max_bound
    }

    fn classify_current(&mut self) -> SignalState {
        let raw = match self.max_after_drop() {
            Some(value) if self.is_within_bounds(value) => SignalState::Good,
            Some(_) => SignalState::Bad,
            None => SignalState::Bad,
        };

        match raw {
            SignalState::Good => {
                self.consecutive_good_count += 1;
                if self.consecutive_good_count >= self.stable_threshold {
                    self.last_classification = Some(SignalState::Stable);
                    SignalState::Stable
                } else {
                    self.last_classification = Some(SignalState::Good);
                    SignalState::Good
                }
            }
            _ => {
                self.consecutive_good_count = 0;
                self.last_classification = Some(SignalState::Bad);
                SignalState::Bad
            }
        }
    }
}

impl BoundaryClassifierBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn signal_index(mut self, index: usize) -> Self {
        self.signal_index = Some(index);
        self
    }

    pub fn bounds(mut self, min_bound: f64, max_bound: f64) -> Self {
        self.min_bound = Some(min_bound);
        self.max_bound = Some(max_bound);
        self
    }

    pub fn with_buffer_config(mut self, buffer_size: usize, drop_front: usize) -> Self {
        self.buffer_size = buffer_size;
        self.drop_front = drop_front;
        self
    }

    pub fn with_stability_config(mut self, stable_threshold: u32) -> Self {
        self.stable_threshold = stable_threshold;
        self
    }

    pub fn build(self) -> Result<BoundaryClassifier, BciError> {
        let signal_index = self
            .signal_index
            .ok_or_else(|| BciError::classifier("signal_index is required"))?;
        let min_bound = self
            .min_bound
            .ok_or_else(|| BciError::classifier("bounds are required"))?;
        let max_bound = self
            .max_bound
            .ok_or_else(|| BciError::classifier("bounds are required"))?;

        if min_bound >= max_bound {
            return Err(BciError::classifier(format!(
                "min_bound ({min_bound}) must be less than max_bound ({max_bound})"
            )));
        }
        if self.stable_threshold == 0 {
            return Err(BciError::classifier("stable_threshold must be greater than 0"));
        }

        Ok(BoundaryClassifier {
            name: self.name,
            signal_index,
            min_bound,
            max_bound,
            drop_front: self.drop_front,
            buffer_size: self.buffer_size,
            stable_threshold: self.stable_threshold,
            consecutive_good_count: 0,
            last_classification: None,
            history: VecDeque::with_capacity(self.buffer_size),
        })
    }
}

impl ClassifierPlugin for BoundaryClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    /// The boundary classifier's bounds are fixed at construction rather
    /// than learned, so training only resets tracking state -- the data
    /// gathered during `data_collect` is discarded.
    fn train(&mut self, _dataset: &Dataset) -> Result<(), BciError> {
        self.history.clear();
        self.consecutive_good_count = 0;
        self.last_classification = None;
        Ok(())
    }

    fn apply(&mut self, sample: &Sample) -> Result<ClassificationResult, BciError> {
        if self.signal_index >= sample.nchannels() {
            return Err(BciError::classifier(format!(
                "signal index {} is out of range for a {}-channel sample",
                self.signal_index,
                sample.nchannels()
            )));
        }
        let ncols = sample.samples.ncols();
        if ncols == 0 {
            return Err(BciError::classifier("empty sample"));
        }

        for col in 0..ncols {
            let value = sample.samples[[self.signal_index, col]];
            if self.history.len() == self.buffer_size {
                self.history.pop_front();
            }
            self.history.push_back(value);
        }

        let classification = self.classify_current();
        Ok(ClassificationResult {
            tokens: vec![ParamValue::Str(classification.as_str().to_string())],
            timestamp: sample.timestamps.last().copied(),
        })
    }

    fn set_parameter(&mut self, name: &str, values: &[ParamValue]) -> Result<bool, BciError> {
        match name {
            "bounds" => {
                if values.len() != 2 {
                    return Err(BciError::classifier("bounds needs exactly two values: min, max"));
                }
                let min = values[0].as_f64()?;
                let max = values[1].as_f64()?;
                if min >= max {
                    return Err(BciError::classifier("min_bound must be less than max_bound"));
                }
                self.min_bound = min;
                self.max_bound = max;
                Ok(true)
            }
            "signal_index" => {
                self.signal_index = values
                    .first()
                    .ok_or_else(|| BciError::classifier("missing value for signal_index"))?
                    .as_i64()? as usize;
                Ok(true)
            }
            "stable_threshold" => {
                let threshold = values
                    .first()
                    .ok_or_else(|| BciError::classifier("missing value for stable_threshold"))?
                    .as_i64()?;
                if threshold <= 0 {
                    return Err(BciError::classifier("stable_threshold must be greater than 0"));
                }
                self.stable_threshold = threshold as u32;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        match name {
            "bounds" => Some(ParamValue::List(vec![
                ParamValue::Float(self.min_bound),
                ParamValue::Float(self.max_bound),
            ])),
            "signal_index" => Some(ParamValue::Int(self.signal_index as i64)),
            "stable_threshold" => Some(ParamValue::Int(self.stable_threshold as i64)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sample_with_value(value: f64) -> Sample {
        Sample {
            samples: Array2::from_shape_vec((1, 1), vec![value]).unwrap(),
            status: vec![0],
            timestamps: vec![1.0],
            labels: vec!["ch0".to_string()],
        }
    }

    #[test]
    fn classifies_within_bounds_as_good_then_stable() {
        let mut classifier = BoundaryClassifier::builder()
            .signal_index(0)
            .bounds(0.0, 2.0)
            .with_buffer_config(5, 0)
            .with_stability_config(2)
            .build()
            .unwrap();

        let first = classifier.apply(&sample_with_value(1)).unwrap();
        assert_eq!(first.tokens, vec![ParamValue::Str("good".to_string())]);

        let second = classifier.apply(&sample_with_value(1)).unwrap();
        assert_eq!(second.tokens, vec![ParamValue::Str("stable".to_string())]);
    }

    #[test]
    fn out_of_bounds_resets_stability() {
        let mut classifier = BoundaryClassifier::builder()
            .signal_index(0)
            .bounds(0.0, 2.0)
            .with_buffer_config(5, 0)
            .with_stability_config(2)
            .build()
            .unwrap();

        classifier.apply(&sample_with_value(1)).unwrap();
        let result = classifier.apply(&sample_with_value(5)).unwrap();
        assert_eq!(result.tokens, vec![ParamValue::Str("bad".to_string())]);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = BoundaryClassifier::builder()
            .signal_index(0)
            .bounds(2.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), 0);
    }
}
