//! Wire framing: `| 4-byte BE length | UTF-8 JSON |`.
//!
//! The reader keeps an accumulator and emits only complete frames. An
//! oversized or zero length is a protocol violation that tears the
//! stream down — a defense against length-field corruption.

use crate::{IpcError, IpcResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are rejected and the stream torn down.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> IpcResult<()> {
    if payload.is_empty() {
        return Err(IpcError::ZeroLengthFrame);
    }
    if payload.len() > MAX_FRAME_BYTES {
        return Err(IpcError::FrameTooLarge {
            size: payload.len(),
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one frame. Convenience wrapper over [`FrameReader`] for
/// one-shot use; sustained readers should keep a `FrameReader` so partial
/// data survives between calls.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> IpcResult<Option<Vec<u8>>> {
    FrameReader::new(reader).next_frame().await
}

/// Accumulating frame reader over any byte stream.
pub struct FrameReader<R> {
    inner: R,
    acc: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            acc: Vec::new(),
        }
    }

    /// Next complete frame, `Ok(None)` on clean EOF between frames.
    pub async fn next_frame(&mut self) -> IpcResult<Option<Vec<u8>>> {
        loop {
            if self.acc.len() >= 4 {
                let len =
                    u32::from_be_bytes([self.acc[0], self.acc[1], self.acc[2], self.acc[3]])
                        as usize;
                if len == 0 {
                    return Err(IpcError::ZeroLengthFrame);
                }
                if len > MAX_FRAME_BYTES {
                    return Err(IpcError::FrameTooLarge { size: len });
                }
                if self.acc.len() >= 4 + len {
                    let frame = self.acc[4..4 + len].to_vec();
                    self.acc.drain(..4 + len);
                    return Ok(Some(frame));
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.acc.is_empty() {
                    return Ok(None);
                }
                return Err(IpcError::Disconnected);
            }
            self.acc.extend_from_slice(&chunk[..n]);
        }
    }
}
