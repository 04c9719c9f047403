//! WebSocket observer stream: accept loop and per-observer tasks.
//!
//! Every accepted connection becomes one observer:
//!
//! 1. The WebSocket handshake is completed.
//! 2. The observer is attached to the [`Broadcaster`]; the returned
//!    subscription yields the snapshot first, then deltas.
//! 3. Two tasks run until either ends:
//!    - **writer**: subscription → JSON text frames,
//!    - **reader**: drains incoming frames to notice Close and errors.
//! 4. The observer is detached.
//!
//! A writer that falls behind is evicted by the broadcaster when its queue
//! fills up; the subscription then ends and the session closes.
//!
//! Shutdown is triggered by a shared `AtomicBool` cleared from the Ctrl+C
//! handler in `main.rs`; the accept loop polls it every 200 ms.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::application::Broadcaster;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and serves observers until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    broadcaster: Arc<Broadcaster>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind observer stream on {addr}"))?;
    serve(listener, broadcaster, running).await
}

/// Accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("observer stream listening on ws://{addr}");
    }

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping observer accept loop");
            break;
        }

        // Short timeout so the shutdown flag is checked regularly.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("observer connection from {peer_addr}");
                let b = Arc::clone(&broadcaster);
                tokio::spawn(async move {
                    handle_observer(stream, peer_addr, b).await;
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-observer handler ──────────────────────────────────────────────────────

async fn handle_observer(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    broadcaster: Arc<Broadcaster>,
) {
    match run_observer(raw_stream, peer_addr, broadcaster).await {
        Ok(()) => info!("observer {peer_addr} closed"),
        Err(e) => warn!("observer {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_observer(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    broadcaster: Arc<Broadcaster>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let mut subscription = broadcaster.subscribe();
    let id = subscription.id();
    info!(
        "observer {peer_addr} attached as {id} ({} snapshot messages)",
        subscription.pending_snapshot()
    );

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // ── Writer: subscription → text frames ────────────────────────────────────
    let mut writer = tokio::spawn(async move {
        while let Some(env) = subscription.next().await {
            if ws_tx.send(WsMessage::Text(env.json().to_string())).await.is_err() {
                debug!("observer {id}: send failed (client gone)");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Reader: watch for Close ──────────────────────────────────────────────
    let mut reader = tokio::spawn(async move {
        loop {
            match ws_rx.next().await {
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("observer {id}: closed by client");
                    break;
                }
                Some(Ok(WsMessage::Text(text))) => {
                    debug!("observer {id}: ignoring {} byte text frame", text.len());
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => break,
                Some(Err(e)) => {
                    warn!("observer {id}: WebSocket error: {e}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    broadcaster.unsubscribe(&id);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
