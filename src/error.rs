use thiserror::Error;

/// The three-kind error taxonomy of the BCI server, plus the I/O plumbing
/// error needed to get there.
///
/// `Display` always renders as `"{code}: {msg}"` for the coded variants and a
/// plain message for the others -- there is no bug-compatible broken
/// formatting call here.
#[derive(Error, Debug)]
pub enum BciError {
    #[error("{context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("{code}: {msg}")]
    Engine { code: u16, msg: String },

    #[error("{code}: {msg}")]
    Protocol { code: u16, msg: String },

    #[error("{msg}")]
    Device { msg: String },

    #[error("{msg}")]
    Classifier { msg: String },
}

impl BciError {
    pub fn engine(code: u16, msg: impl Into<String>) -> Self {
        BciError::Engine {
            code,
            msg: msg.into(),
        }
    }

    pub fn protocol(code: u16, msg: impl Into<String>) -> Self {
        BciError::Protocol {
            code,
            msg: msg.into(),
        }
    }

    pub fn device(msg: impl Into<String>) -> Self {
        BciError::Device { msg: msg.into() }
    }

    pub fn classifier(msg: impl Into<String>) -> Self {
        BciError::Classifier { msg: msg.into() }
    }

    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        BciError::Io {
            source,
            context: context.into(),
        }
    }

    /// The wire-level error code this error should be reported to the client
    /// under (see the protocol error taxonomy). Device and classifier errors
    /// are always reported as code 0.
    pub fn code(&self) -> u16 {
        match self {
            BciError::Engine { code, .. } => *code,
            BciError::Protocol { code, .. } => *code,
            BciError::Device { .. } | BciError::Classifier { .. } | BciError::Io { .. } => 0,
        }
    }

    /// The message text to report to the client, without the code prefix.
    pub fn message(&self) -> String {
        match self {
            BciError::Engine { msg, .. } => msg.clone(),
            BciError::Protocol { msg, .. } => msg.clone(),
            BciError::Device { msg } => msg.clone(),
            BciError::Classifier { msg } => msg.clone(),
            BciError::Io { source, context } => format!("{context}: {source}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_code_and_message() {
        let e = BciError::engine(402, "Please specify a classifier first");
        assert_eq!(format!("{e}"), "402: Please specify a classifier first");
    }

    #[test]
    fn device_error_has_no_code_prefix() {
        let e = BciError::device("port not found");
        assert_eq!(e.code(), 0);
        assert_eq!(e.message(), "port not found");
    }
}
