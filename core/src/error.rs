//! Error types shared by the indicator core.

use std::path::PathBuf;

/// Failure reported by a native tray implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors produced while building, mutating or closing an indicator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("an indicator is already active in this area")]
    AlreadyExists,

    #[error("failed to initialise tray: {0}")]
    NativeInit(#[source] NativeError),

    #[error("failed to update tray: {0}")]
    NativeUpdate(#[source] NativeError),

    #[error("failed to transfer resource '{locator}': {source}")]
    ResourceTransfer {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported resource locator '{0}'")]
    UnsupportedLocator(String),

    #[error("path is not representable as ASCII: {0:?}")]
    Encoding(PathBuf),

    #[error("indicator state unavailable: {0:?}")]
    Unavailable(crate::owner::Access),

    #[error("task queue has shut down")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
