//! Message-passing glue between the Engine and its Recorder/Classifier.
//!
//! Rather than have the Recorder and Classifier call back directly into the
//! Engine (which would mean all three holding references to each other),
//! each component is instead handed a cloneable `EventSink` and never learns
//! who is listening on the other end.

use crossbeam_channel::Sender;

/// An event a Recorder or Classifier wants reported to the connected client.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Mode(String),
    Result { tokens: Vec<crate::types::ParamValue>, timestamp: Option<f64> },
    Error { code: u16, message: String },
}

/// A cloneable handle components use to push events toward the client
/// without holding a reference back to the Engine.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn mode(&self, mode: impl Into<String>) {
        let _ = self.tx.send(EngineEvent::Mode(mode.into()));
    }

    pub fn result(&self, tokens: Vec<crate::types::ParamValue>, timestamp: Option<f64>) {
        let _ = self.tx.send(EngineEvent::Result { tokens, timestamp });
    }

    pub fn error(&self, e: crate::error::BciError) {
        let _ = self.tx.send(EngineEvent::Error {
            code: e.code(),
            message: e.message(),
        });
    }
}
