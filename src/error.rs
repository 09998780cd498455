// Error handling for the media control core

use std::fmt;

/// Playback error kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The resolver returned nothing usable for a query
    ResolutionFailed(String),

    /// Audio file unreadable, corrupt or in an unsupported format
    DecodeFailed(String),

    /// External media process failed to start or answer within the startup window
    TransportUnavailable(String),

    /// An established IPC exchange with the media process failed
    TransportIo(String),

    /// Pause or rewind requested with nothing loaded
    NoActiveTrack,

    /// Audio output device error
    OutputDevice(String),

    /// Invalid state transition
    InvalidState(String),

    /// Worker did not exit within the join window
    WorkerTimeout(String),

    /// The worker was cancelled before the operation finished
    Cancelled,

    /// Invalid or unreadable configuration
    Config(String),

    /// IO error
    Io(String),
}

impl PlayerError {
    /// Short stable name of the error kind, used in log lines and UI toasts
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::ResolutionFailed(_) => "ResolutionFailed",
            PlayerError::DecodeFailed(_) => "DecodeFailed",
            PlayerError::TransportUnavailable(_) => "TransportUnavailable",
            PlayerError::TransportIo(_) => "TransportIOError",
            PlayerError::NoActiveTrack => "NoActiveTrack",
            PlayerError::OutputDevice(_) => "OutputDeviceError",
            PlayerError::InvalidState(_) => "InvalidState",
            PlayerError::WorkerTimeout(_) => "WorkerTimeout",
            PlayerError::Cancelled => "Cancelled",
            PlayerError::Config(_) => "Config",
            PlayerError::Io(_) => "Io",
        }
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlayerError::ResolutionFailed(msg) => write!(f, "Resolution failed: {}", msg),
            PlayerError::DecodeFailed(msg) => write!(f, "Decode failed: {}", msg),
            PlayerError::TransportUnavailable(msg) => write!(f, "Media process unavailable: {}", msg),
            PlayerError::TransportIo(msg) => write!(f, "Media process IO error: {}", msg),
            PlayerError::NoActiveTrack => write!(f, "No active track"),
            PlayerError::OutputDevice(msg) => write!(f, "Output device error: {}", msg),
            PlayerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PlayerError::WorkerTimeout(msg) => write!(f, "Worker timeout: {}", msg),
            PlayerError::Cancelled => write!(f, "Cancelled"),
            PlayerError::Config(msg) => write!(f, "Config error: {}", msg),
            PlayerError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;

// Conversion implementations
impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(err: serde_json::Error) -> Self {
        PlayerError::TransportIo(format!("malformed reply: {}", err))
    }
}

impl From<toml::de::Error> for PlayerError {
    fn from(err: toml::de::Error) -> Self {
        PlayerError::Config(err.to_string())
    }
}
