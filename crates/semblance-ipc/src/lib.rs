//! Local IPC between the Semblance core and gateway.
//!
//! A single bidirectional byte stream carries length-prefixed UTF-8 JSON
//! frames: 4-byte big-endian length, then the payload. The gateway
//! listens on a per-user Unix domain socket and accepts exactly one core
//! connection; the core side correlates responses by request id and
//! tolerates out-of-order delivery.

#![forbid(unsafe_code)]

mod client;
mod frame;
mod server;

pub use client::{ClientConfig, CoreClient};
pub use frame::{read_frame, write_frame, FrameReader, MAX_FRAME_BYTES};
pub use server::{run_connection, serve_unix, RequestHandler};

use semblance_proto::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge { size: usize },

    #[error("zero-length frame")]
    ZeroLengthFrame,

    #[error("peer disconnected")]
    Disconnected,

    #[error("request timed out")]
    Timeout,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    /// Stable taxonomy code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FrameTooLarge { .. } | Self::ZeroLengthFrame => ErrorCode::FrameTooLarge,
            Self::Timeout => ErrorCode::Timeout,
            _ => ErrorCode::IpcDisconnected,
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;
