//! Gateway-side IPC listener.
//!
//! One Unix domain socket per user, `0600`, exactly one live core
//! connection — later connections are closed immediately. Frames on a
//! connection are processed strictly in arrival order; a frame that
//! fails to parse as JSON is discarded with an error report and the
//! stream continues.

use crate::frame::{write_frame, FrameReader};
use crate::{IpcError, IpcResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tracing::{error, info, warn};

/// The gateway's request entry point: raw JSON in, response out.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, raw: serde_json::Value) -> semblance_proto::ActionResponse;
}

/// Serve one established connection until EOF or protocol violation.
pub async fn run_connection<S, H>(stream: S, handler: Arc<H>) -> IpcResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: RequestHandler,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);

    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("core connection closed");
                return Ok(());
            }
            Err(e @ (IpcError::FrameTooLarge { .. } | IpcError::ZeroLengthFrame)) => {
                // Length-field corruption: tear the socket down.
                error!(error = %e, "protocol violation, tearing down connection");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let raw: serde_json::Value = match serde_json::from_slice(&frame) {
            Ok(value) => value,
            Err(e) => {
                // Bad JSON discards the frame only; the stream survives.
                warn!(error = %e, "discarding unparseable frame");
                continue;
            }
        };

        let response = handler.handle(raw).await;
        let bytes = serde_json::to_vec(&response)?;
        write_frame(&mut write_half, &bytes).await?;
    }
}

/// Bind the per-user socket and serve core connections, one at a time.
pub async fn serve_unix<H>(socket_path: &Path, handler: Arc<H>) -> IpcResult<()>
where
    H: RequestHandler,
{
    // A stale socket file from a previous run would block the bind.
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(socket_path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(socket_path, perms)?;
    }

    info!(path = %socket_path.display(), "gateway listening");
    let active = Arc::new(AtomicBool::new(false));

    loop {
        let (stream, _) = listener.accept().await?;

        if active.swap(true, Ordering::SeqCst) {
            // Only one core connection at a time.
            warn!("rejecting additional core connection");
            drop(stream);
            continue;
        }

        let handler = handler.clone();
        let active = active.clone();
        tokio::spawn(async move {
            if let Err(e) = run_connection(stream, handler).await {
                error!(error = %e, "connection ended with error");
            }
            active.store(false, Ordering::SeqCst);
        });
    }
}
