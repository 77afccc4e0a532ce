use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed request: {0}")]
    Protocol(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stale handle: {0}")]
    StaleHandle(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Engine not stopped: {0}")]
    NotStopped(String),

    #[error("Engine disconnected: {0}")]
    EngineDisconnected(String),

    #[error("DAP error: {0}")]
    Dap(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Debug session is closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Protocol(_) => 1000,
            Error::UnknownCommand(_) => 1001,
            Error::InvalidState(_) => 1010,
            Error::SessionClosed => 1011,
            Error::StaleHandle(_) => 1020,
            Error::UnknownSource(_) => 1021,
            Error::Engine(_) | Error::Dap(_) => 1030,
            Error::NotStopped(_) => 1031,
            Error::EngineDisconnected(_) => 1032,
            Error::Compile(_) => 1040,
            Error::Config(_) => 1050,
            Error::Process(_) => 1060,
            Error::Internal(_) | Error::Io(_) | Error::Json(_) => 1099,
        }
    }

    /// Short category name reported to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Protocol(_) | Error::UnknownCommand(_) | Error::Json(_) => "protocol",
            Error::InvalidState(_) | Error::SessionClosed | Error::NotStopped(_) => "state",
            Error::StaleHandle(_) => "staleHandle",
            Error::UnknownSource(_) => "unknownSource",
            Error::Engine(_) | Error::Dap(_) | Error::EngineDisconnected(_) => "engine",
            Error::Compile(_) => "compile",
            Error::Config(_) => "config",
            Error::Process(_) | Error::Io(_) | Error::Internal(_) => "internal",
        }
    }

    /// Errors after which the debugged process can no longer be reached.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::EngineDisconnected(_))
    }
}
