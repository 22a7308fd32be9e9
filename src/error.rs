//! Client error types.
//!
//! Every failure is classified into one of a small set of [`ErrorKind`]s that
//! decide how the frame loop reacts: fatal kinds stop the client, transient
//! kinds abandon the current frame, lock rejections and stream errors are
//! logged and leave state untouched.

use thiserror::Error;

use crate::backend::BackendError;
use crate::runtime::{LockType, RuntimeError, StreamFormat, StreamType};

/// How the client reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Device creation, swap-chain import or a lost device. Stops the client.
    FatalDevice,
    /// Invalid configuration or a backend that is not compiled in. Stops the client.
    FatalContent,
    /// A runtime call failed; the current frame is skipped.
    Transient,
    /// A configuration lock is held by another client; nothing was changed.
    LockRejected,
    /// A data stream could not be started or stopped.
    Stream,
}

impl ErrorKind {
    /// Whether the client must stop after this error.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::FatalDevice | Self::FatalContent)
    }
}

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Graphics device error: {0}")]
    Device(#[from] BackendError),
    #[error("Swap chain import failed: {0}")]
    SwapChainImport(RuntimeError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),
    #[error("Runtime call {call} failed: {source}")]
    Runtime {
        call: &'static str,
        #[source]
        source: RuntimeError,
    },
    #[error("{0:?} lock is held by another client")]
    LockRejected(LockType),
    #[error("Data stream {stream_type:?}/{format:?}: {reason}")]
    Stream {
        stream_type: StreamType,
        format: StreamFormat,
        reason: String,
    },
}

impl ClientError {
    /// Wrap a failed runtime call as a transient error.
    pub fn runtime(call: &'static str, source: RuntimeError) -> Self {
        Self::Runtime { call, source }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(_) | Self::SwapChainImport(_) => ErrorKind::FatalDevice,
            Self::InvalidConfig(_) | Self::BackendUnavailable(_) => ErrorKind::FatalContent,
            Self::Runtime { .. } => ErrorKind::Transient,
            Self::LockRejected(_) => ErrorKind::LockRejected,
            Self::Stream { .. } => ErrorKind::Stream,
        }
    }

    /// Whether the client must stop after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
