pub mod background_reader;
pub mod classifier;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod recorder;
pub mod sink;
pub mod types;

pub use classifier::{BoundaryClassifier, ClassifierPlugin, ClassifierState, ClassifierStateMachine};
pub use config::{load_config, load_config_or_default, AppConfig};
pub use device::{Biosemi, DeviceDriver, Emulator};
pub use engine::Engine;
pub use error::BciError;
pub use logger::Logger;
pub use recorder::{MarkerLogEntry, Recorder, RecorderParam};
pub use sink::{EngineEvent, EventSink};
pub use types::{ChannelSelector, Marker, MarkerKind, ParamValue, Sample, TimingMode};
