use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The audio backend could not open or decode the supplied file.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The output device went away or refused to open.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unknown playback source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns true if the error came from the filesystem layer.
    pub fn is_io(&self) -> bool {
        matches!(self, BridgeError::Io(_))
    }

    /// Returns true if the error means the file itself cannot be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, BridgeError::Decode(_))
    }

    /// Returns true if the output device disappeared.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, BridgeError::DeviceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
