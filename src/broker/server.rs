//! Unix-socket front end of the broker.
//!
//! Each accepted connection gets its own task that parses request lines and
//! forwards them, with a oneshot reply channel, to the single command loop in
//! [`serve`]. Only that loop touches [`BrokerState`].

use super::state::BrokerState;
use crate::protocol::{read_frame, write_frame, ProtocolError, Request, Response};
use crate::session::SessionPaths;
use anyhow::{anyhow, Context, Result};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::future::Future;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 256;
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type Envelope = (Request, oneshot::Sender<Response>);

/// Run the broker for one session until `shutdown` resolves or a client sends
/// a `shutdown` request. Fails if another broker already owns the session.
pub async fn serve<F>(paths: SessionPaths, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    if let Some(parent) = paths.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket directory {}", parent.display()))?;
    }

    // Singleton: held for the lifetime of this function
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.broker_lock)
        .with_context(|| format!("opening {}", paths.broker_lock.display()))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| {
        anyhow!(
            "A broker is already running for session {}. Only one broker can serve a session.",
            paths.id
        )
    })?;

    // We own the session now, so any socket file left behind is stale
    if paths.socket.exists() {
        std::fs::remove_file(&paths.socket)
            .with_context(|| format!("removing stale socket {}", paths.socket.display()))?;
    }

    let listener = UnixListener::bind(&paths.socket)
        .with_context(|| format!("binding {}", paths.socket.display()))?;
    info!(
        session = %paths.id,
        socket = %paths.socket.display(),
        pid = std::process::id(),
        "Broker listening"
    );

    let (tx, mut rx) = mpsc::channel::<Envelope>(COMMAND_QUEUE_DEPTH);
    let mut state = BrokerState::new(paths.id.as_str());
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Broker stopping on signal");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let tx = tx.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, tx).await {
                            debug!(error = %e, "Connection closed with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
            Some((request, reply)) = rx.recv() => {
                let stop = matches!(request, Request::Shutdown { .. });
                let response = state.apply(request);
                let _ = reply.send(response);
                if stop {
                    break;
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Requests still queued are answered "broker shutting down" by their
    // connection tasks once the receiver is gone.
    drop(listener);
    drop(rx);
    drop(tx);
    let _ = tokio::time::timeout(DRAIN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    connections.abort_all();

    if let Err(e) = std::fs::remove_file(&paths.socket) {
        warn!(error = %e, socket = %paths.socket.display(), "Failed to remove socket file");
    }
    info!(session = %paths.id, "Broker stopped");
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    tx: mpsc::Sender<Envelope>,
) -> Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let raw = match read_frame::<_, serde_json::Value>(&mut reader).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(()),
            Err(ProtocolError::Malformed(e)) => {
                let response = Response::error("unknown", None, format!("malformed request: {e}"));
                write_frame(&mut write_half, &response).await?;
                continue;
            }
            Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                // The rest of the oversized line is still in the stream
                let response = Response::error("unknown", None, e.to_string());
                write_frame(&mut write_half, &response).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let response = match serde_json::from_value::<Request>(raw.clone()) {
            Ok(request) => dispatch(request, &tx).await,
            Err(e) => {
                let op = raw
                    .get("op")
                    .and_then(|op| op.as_str())
                    .unwrap_or("unknown");
                Response::error(op, None, format!("invalid request: {e}"))
            }
        };

        write_frame(&mut write_half, &response).await?;
    }
}

async fn dispatch(request: Request, tx: &mpsc::Sender<Envelope>) -> Response {
    let op = request.op();
    let (reply_tx, reply_rx) = oneshot::channel();
    if tx.send((request, reply_tx)).await.is_err() {
        return Response::error(op, None, "broker shutting down");
    }
    reply_rx
        .await
        .unwrap_or_else(|_| Response::error(op, None, "broker shutting down"))
}
