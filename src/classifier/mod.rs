//! Classifier state machine (§4.3): drives a `ClassifierPlugin` through
//! `idle -> data_collect -> training -> application` on a dedicated
//! background thread, gating `application` on a completed training pass.

mod boundary;

pub use boundary::BoundaryClassifier;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::BciError;
use crate::recorder::Recorder;
use crate::sink::EventSink;
use crate::types::{ParamValue, Sample};

/// The epochs gathered during `data_collect`, handed to the plugin whole
/// when the client requests `training`.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub epochs: Vec<Sample>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.epochs.push(sample);
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// The tokens a plugin wants reported to the client as `RESULT PROVIDE`.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub tokens: Vec<ParamValue>,
    pub timestamp: Option<f64>,
}

/// A pluggable classification algorithm, driven through a trait object
/// rather than base-class inheritance with `_train`/`_apply` overrides.
pub trait ClassifierPlugin: Send {
    fn name(&self) -> &str;
    fn train(&mut self, dataset: &Dataset) -> Result<(), BciError>;
    fn apply(&mut self, sample: &Sample) -> Result<ClassificationResult, BciError>;
    fn set_parameter(&mut self, name: &str, values: &[ParamValue]) -> Result<bool, BciError>;
    fn get_parameter(&self, name: &str) -> Option<ParamValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Idle,
    DataCollect,
    Training,
    Application,
}

impl ClassifierState {
    /// Accepts both the wire spelling (`data-collect`) and the internal one
    /// (`data_collect`), since client implementations are told only the
    /// hyphenated form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "data_collect" | "data-collect" => Some(Self::DataCollect),
            "training" => Some(Self::Training),
            "application" => Some(Self::Application),
            _ => None,
        }
    }

    /// Wire spelling, as sent in `MODE PROVIDE "<mode>"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DataCollect => "data-collect",
            Self::Training => "training",
            Self::Application => "application",
        }
    }
}

struct Shared {
    state: Mutex<ClassifierState>,
    state_condvar: Condvar,
    training_complete: AtomicBool,
    running: AtomicBool,
    dataset: Mutex<Dataset>,
}

/// Owns a plugin and a background thread that steps it through the state
/// machine, reading fresh chunks from `recorder` and pushing results and
/// mode changes through `sink`. The plugin itself lives behind a shared
/// mutex rather than being moved wholesale into the thread, so the Engine
/// can still read and set its parameters from the command-dispatch side.
pub struct ClassifierStateMachine {
    shared: Arc<Shared>,
    plugin: Arc<Mutex<Box<dyn ClassifierPlugin>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClassifierStateMachine {
    pub fn new(plugin: Box<dyn ClassifierPlugin>, recorder: Arc<Recorder>, sink: EventSink) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ClassifierState::Idle),
            state_condvar: Condvar::new(),
            training_complete: AtomicBool::new(false),
            running: AtomicBool::new(true),
            dataset: Mutex::new(Dataset::new()),
        });
        let plugin = Arc::new(Mutex::new(plugin));

        let worker_shared = shared.clone();
        let worker_plugin = plugin.clone();
        let handle = thread::spawn(move || run(worker_shared, worker_plugin, recorder, sink));

        Self {
            shared,
            plugin,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> String {
        self.plugin.lock().unwrap().name().to_string()
    }

    pub fn set_parameter(&self, name: &str, values: &[ParamValue]) -> Result<bool, BciError> {
        self.plugin.lock().unwrap().set_parameter(name, values)
    }

    pub fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        self.plugin.lock().unwrap().get_parameter(name)
    }

    pub fn state(&self) -> ClassifierState {
        *self.shared.state.lock().unwrap()
    }

    pub fn training_complete(&self) -> bool {
        self.shared.training_complete.load(Ordering::Relaxed)
    }

    /// Request a transition. `application` is refused until a training pass
    /// has completed at least once; every other transition always succeeds.
    /// Entering `data_collect` discards whatever was gathered last time.
    pub fn set_mode(&self, requested: ClassifierState) -> Result<(), BciError> {
        if requested == ClassifierState::Application && !self.training_complete() {
            return Err(BciError::classifier(
                "cannot enter application mode before training has completed",
            ));
        }

        if requested == ClassifierState::DataCollect {
            self.shared.dataset.lock().unwrap().epochs.clear();
        }

        *self.shared.state.lock().unwrap() = requested;
        self.shared.state_condvar.notify_all();
        Ok(())
    }

    pub fn stop(&self) -> Result<(), BciError> {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.state_condvar.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle
                .join()
                .map_err(|_| BciError::classifier("classifier thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ClassifierStateMachine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Drives the state machine. Each state's one-time entry actions (flushing
/// the recorder, toggling capture, announcing the new mode) fire only on
/// the iteration that transitions into it, tracked via `last_state` --
/// everything else in the match arm is the steady-state body, re-run every
/// poll.
fn run(
    shared: Arc<Shared>,
    plugin: Arc<Mutex<Box<dyn ClassifierPlugin>>>,
    recorder: Arc<Recorder>,
    sink: EventSink,
) {
    let mut last_state: Option<ClassifierState> = None;

    while shared.running.load(Ordering::Relaxed) {
        let state = *shared.state.lock().unwrap();
        let entering = last_state != Some(state);
        last_state = Some(state);

        match state {
            ClassifierState::Idle => {
                recorder.stop_capture();
                if entering {
                    sink.mode(ClassifierState::Idle.as_str());
                }
                let guard = shared.state.lock().unwrap();
                let _ = shared.state_condvar.wait_timeout_while(guard, Duration::from_millis(200), |s| {
                    *s == ClassifierState::Idle && shared.running.load(Ordering::Relaxed)
                });
            }
            ClassifierState::DataCollect => {
                if entering {
                    recorder.flush();
                    recorder.wait_calibrated();
                    recorder.start_capture();
                    shared.dataset.lock().unwrap().epochs.clear();
                    sink.mode(ClassifierState::DataCollect.as_str());
                }
                if let Some(sample) = recorder.read(false, true) {
                    shared.dataset.lock().unwrap().push(sample);
                } else {
                    thread::sleep(Duration::from_millis(20));
                }
            }
            ClassifierState::Training => {
                if entering {
                    recorder.stop_capture();
                    sink.mode(ClassifierState::Training.as_str());
                }
                let dataset = shared.dataset.lock().unwrap().clone();
                let mut guard = plugin.lock().unwrap();
                match guard.train(&dataset) {
                    Ok(()) => {
                        shared.training_complete.store(true, Ordering::Relaxed);
                        log::info!("classifier {} finished training", guard.name());
                    }
                    Err(e) => {
                        log::warn!("classifier {} training failed: {e}", guard.name());
                        drop(guard);
                        sink.error(e);
                    }
                }
                *shared.state.lock().unwrap() = ClassifierState::Idle;
            }
            ClassifierState::Application => {
                if !shared.training_complete.load(Ordering::Relaxed) {
                    log::error!("cannot enter application state without training");
                    *shared.state.lock().unwrap() = ClassifierState::Idle;
                    continue;
                }

                recorder.start_capture();
                if entering {
                    sink.mode(ClassifierState::Application.as_str());
                }
                if let Some(sample) = recorder.read(false, true) {
                    let result = plugin.lock().unwrap().apply(&sample);
                    match result {
                        Ok(result) => sink.result(result.tokens, result.timestamp),
                        Err(e) => sink.error(e),
                    }
                } else {
                    thread::sleep(Duration::from_millis(20));
                }
            }
        }
    }
}
