use thiserror::Error;

/// Error families surfaced to the user. Render integrity problems never appear here;
/// the watchdog repairs them silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Session,
    Transport,
    Contract,
    RemoteRejection,
    Validation,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
    #[error("io_error - {0}")]
    Io(String),
    #[error("no_session - {0}")]
    Session(String),
    #[error("transport_error - {0}")]
    Transport(String),
    #[error("timeout - {0}")]
    Timeout(String),
    #[error("contract_not_ready - {0}")]
    Contract(String),
    #[error("write_in_progress - {0}")]
    Busy(String),
    #[error("remote_rejected - {}", rejection_summary(.status, .code, .message))]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
}

fn rejection_summary(status: &u16, code: &str, message: &str) -> String {
    let mut summary = format!("HTTP {status}");
    if !code.is_empty() {
        summary.push(' ');
        summary.push_str(code);
    }
    if !message.is_empty() {
        summary.push_str(": ");
        summary.push_str(message);
    }
    summary
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn session<M: Into<String>>(message: M) -> Self {
        Self::Session(message.into())
    }

    pub fn transport<M: Into<String>>(message: M) -> Self {
        Self::Transport(message.into())
    }

    pub fn timeout<M: Into<String>>(message: M) -> Self {
        Self::Timeout(message.into())
    }

    pub fn contract<M: Into<String>>(message: M) -> Self {
        Self::Contract(message.into())
    }

    pub fn busy<M: Into<String>>(message: M) -> Self {
        Self::Busy(message.into())
    }

    pub fn rejected<C: Into<String>, M: Into<String>>(status: u16, code: C, message: M) -> Self {
        Self::Rejected {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Io(_) => "io_error",
            Self::Session(_) => "no_session",
            Self::Transport(_) => "transport_error",
            Self::Timeout(_) => "timeout",
            Self::Contract(_) => "contract_not_ready",
            Self::Busy(_) => "write_in_progress",
            Self::Rejected { .. } => "remote_rejected",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message)
            | Self::InvalidData(message)
            | Self::Io(message)
            | Self::Session(message)
            | Self::Transport(message)
            | Self::Timeout(message)
            | Self::Contract(message)
            | Self::Busy(message) => message,
            Self::Rejected { message, .. } => message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(_) => ErrorKind::Session,
            Self::Transport(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::Contract(_) => ErrorKind::Contract,
            Self::Rejected { .. } => ErrorKind::RemoteRejection,
            Self::InvalidInput(_) | Self::Busy(_) => ErrorKind::Validation,
            Self::InvalidData(_) | Self::Io(_) => ErrorKind::Data,
        }
    }

    /// Transport failures can be retried by the user; nothing else should be.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}
