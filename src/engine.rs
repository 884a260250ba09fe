//! Ties together device selection, the Recorder, the classifier state
//! machine, and the TCP accept loop: one connected client at a time,
//! device/classifier torn down when the client disconnects, a socket accept
//! loop that wakes up periodically to notice shutdown instead of blocking
//! forever.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::classifier::{BoundaryClassifier, ClassifierPlugin, ClassifierState, ClassifierStateMachine};
use crate::config::AppConfig;
use crate::device::{Biosemi, DeviceDriver, Emulator};
use crate::error::BciError;
use crate::protocol::{self, CommandContext};
use crate::recorder::Recorder;
use crate::sink::{EngineEvent, EventSink};
use crate::types::ParamValue;

const DEVICE_NAMES: &[&str] = &["emulator", "biosemi"];
const CLASSIFIER_NAMES: &[&str] = &["boundary"];

fn build_device(name: &str) -> Result<Box<dyn DeviceDriver>, BciError> {
    match name {
        "emulator" => Ok(Box::new(Emulator::new(256.0, 8))),
        "biosemi" => Ok(Box::new(Biosemi::new("localhost", 8888, 2048.0, 32))),
        _ => Err(BciError::engine(101, "Recording device not available")),
    }
}

fn build_classifier(name: &str) -> Result<Box<dyn ClassifierPlugin>, BciError> {
    match name {
        "boundary" => {
            let classifier = BoundaryClassifier::builder()
                .signal_index(0)
                .bounds(f64::NEG_INFINITY, f64::INFINITY)
                .build()
                .map_err(|e| BciError::engine(202, e.message()))?;
            Ok(Box::new(classifier))
        }
        _ => Err(BciError::engine(202, "Classifier not available")),
    }
}

/// Per-connection state: the active recorder and classifier, if any, and the
/// sink currently wired to this connection's event-writer thread.
struct Session {
    recorder: Option<Arc<Recorder>>,
    classifier: Option<Arc<ClassifierStateMachine>>,
    sink: Option<EventSink>,
}

impl Session {
    fn empty() -> Self {
        Self {
            recorder: None,
            classifier: None,
            sink: None,
        }
    }
}

pub struct Engine {
    config: AppConfig,
    session: Mutex<Session>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            session: Mutex::new(Session::empty()),
        }
    }

    /// Binds the configured address and accepts connections one at a time
    /// until `shutdown` is set, polling a non-blocking listener rather than
    /// blocking forever so shutdown is noticed promptly.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.server.bind_addr, self.config.server.port);
        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;
        info!("awaiting network connection on {addr}");

        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("client connected: {peer}");
                    self.handle_connection(stream);
                    info!("client disconnected: {peer}");
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(200));
                }
                Err(e) => return Err(e),
            }
        }

        self.teardown_session();
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.session.lock().unwrap().sink = Some(EventSink::new(tx));

        let writer_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!("failed to clone client socket: {e}");
                return;
            }
        };
        let writer = thread::spawn(move || event_writer(writer_stream, rx));

        if let Err(e) = protocol::serve_connection(stream, self) {
            warn!("connection error: {e}");
        }

        self.teardown_session();
        let _ = writer.join();
    }

    fn teardown_session(&self) {
        let mut session = self.session.lock().unwrap();
        if let Some(classifier) = session.classifier.take() {
            let _ = classifier.stop();
        }
        if let Some(recorder) = session.recorder.take() {
            let _ = recorder.stop();
        }
        session.sink = None;
    }

    fn current_sink(session: &Session) -> Result<EventSink, BciError> {
        session
            .sink
            .clone()
            .ok_or_else(|| BciError::engine(0, "no active connection"))
    }
}

/// Drains engine events and writes each as one protocol line, until the
/// sending half is dropped (the connection's session tears down).
fn event_writer(mut stream: TcpStream, rx: crossbeam_channel::Receiver<EngineEvent>) {
    while let Ok(event) = rx.recv() {
        let line = match event {
            EngineEvent::Mode(mode) => format!("MODE PROVIDE \"{mode}\"\r\n"),
            EngineEvent::Result { tokens, timestamp } => {
                let encoded = protocol::encode::encode_list(&tokens);
                match timestamp {
                    Some(ts) => format!("RESULT PROVIDE {encoded} {ts}\r\n"),
                    None => format!("RESULT PROVIDE {encoded}\r\n"),
                }
            }
            EngineEvent::Error { code, message } => format!("ERROR {code} \"{message}\"\r\n"),
        };
        if stream.write_all(line.as_bytes()).is_err() {
            break;
        }
    }
}

impl CommandContext for Engine {
    fn list_devices(&self) -> Vec<String> {
        DEVICE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn set_device(&self, name: &str) -> Result<(), BciError> {
        let device = build_device(name)?;

        let mut session = self.session.lock().unwrap();
        let sink = Self::current_sink(&session)?;

        if let Some(old) = session.recorder.take() {
            info!("switching device");
            let _ = old.stop();
        }

        let recorder = Recorder::new(
            device,
            sink,
            self.config.recorder.ring_buffers,
            self.config.recorder.ring_buffer_bytes,
            self.config.recorder.default_timing_mode,
            self.config.recorder.default_buffer_size_seconds,
            PathBuf::from(&self.config.logging.log_path),
            self.config.logging.diagnostic_logging,
        );
        session.recorder = Some(Arc::new(recorder));
        info!("selected device: {name}");
        Ok(())
    }

    fn open_device(&self) -> Result<(), BciError> {
        let session = self.session.lock().unwrap();
        let recorder = session
            .recorder
            .as_ref()
            .ok_or_else(|| BciError::engine(102, "Please specify a recording device first"))?;
        info!("opening device");
        recorder.start()?;
        Ok(())
    }

    fn set_device_parameter(&self, name: &str, values: Vec<ParamValue>) -> Result<(), BciError> {
        let session = self.session.lock().unwrap();
        let recorder = session
            .recorder
            .as_ref()
            .ok_or_else(|| BciError::engine(301, "Please specify a recording device first"))?;

        match recorder.set_parameter(name, &values) {
            Ok(()) => Ok(()),
            Err(e) if e.message() == "unknown device parameter" => {
                Err(BciError::engine(303, "Unknown device parameter"))
            }
            Err(e) => Err(e),
        }
    }

    fn get_device_parameter(&self, name: &str) -> Result<ParamValue, BciError> {
        let session = self.session.lock().unwrap();
        let recorder = session
            .recorder
            .as_ref()
            .ok_or_else(|| BciError::engine(301, "Please specify a recording device first"))?;

        recorder
            .get_parameter(name)
            .ok_or_else(|| BciError::engine(303, "Unknown device parameter"))
    }

    fn list_classifiers(&self) -> Vec<String> {
        CLASSIFIER_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn set_classifier(&self, name: &str) -> Result<(), BciError> {
        let mut session = self.session.lock().unwrap();
        let recorder = session
            .recorder
            .clone()
            .ok_or_else(|| BciError::engine(201, "Please specify a recording device first"))?;
        let plugin = build_classifier(name)?;
        let sink = Self::current_sink(&session)?;

        if let Some(old) = session.classifier.take() {
            info!("switching classifier");
            let _ = old.stop();
        }

        info!("loading classifier: {name}");
        session.classifier = Some(Arc::new(ClassifierStateMachine::new(plugin, recorder, sink)));
        Ok(())
    }

    fn set_classifier_parameter(&self, name: &str, values: Vec<ParamValue>) -> Result<(), BciError> {
        let session = self.session.lock().unwrap();
        let classifier = session
            .classifier
            .as_ref()
            .ok_or_else(|| BciError::engine(302, "Please specify a classifier first"))?;

        if classifier.set_parameter(name, &values)? {
            Ok(())
        } else {
            Err(BciError::engine(304, "Unknown classifier parameter"))
        }
    }

    fn get_classifier_parameter(&self, name: &str) -> Result<ParamValue, BciError> {
        let session = self.session.lock().unwrap();
        let classifier = session
            .classifier
            .as_ref()
            .ok_or_else(|| BciError::engine(302, "Please specify a classifier first"))?;

        classifier
            .get_parameter(name)
            .ok_or_else(|| BciError::engine(304, "Unknown classifier parameter"))
    }

    fn set_mode(&self, mode: &str) -> Result<(), BciError> {
        let requested = ClassifierState::parse(mode)
            .ok_or_else(|| BciError::engine(401, "Invalid mode requested"))?;

        let session = self.session.lock().unwrap();
        let classifier = session
            .classifier
            .as_ref()
            .ok_or_else(|| BciError::engine(402, "Please specify a classifier first"))?;

        classifier.set_mode(requested)
    }

    fn get_mode(&self) -> Result<String, BciError> {
        let session = self.session.lock().unwrap();
        let classifier = session
            .classifier
            .as_ref()
            .ok_or_else(|| BciError::engine(402, "Please specify a classifier first"))?;
        Ok(classifier.state().as_str().to_string())
    }

    fn set_marker(&self, code: i32, kind: &str, timestamp: f64) -> Result<(), BciError> {
        let marker_kind = crate::types::MarkerKind::parse(kind)
            .ok_or_else(|| BciError::protocol(402, "Unknown marker type"))?;

        let session = self.session.lock().unwrap();
        let recorder = session
            .recorder
            .as_ref()
            .ok_or_else(|| BciError::engine(301, "Please specify a recording device first"))?;

        recorder.set_marker(code, marker_kind, timestamp)
    }
}
