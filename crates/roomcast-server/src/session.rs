//! Socket lifecycle: from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roomcast_core::{ConnectionHandle, ConnectionMeta};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::link::WsLink;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::reactor::HubInput;

/// How long the writer may take to flush after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one upgraded socket.
///
/// 1. Wraps the socket in a [`WsLink`] and announces it to the reactor
/// 2. Spawns the writer, which marks the link ready and forwards frames
/// 3. Forwards inbound text frames to the reactor in arrival order
/// 4. On disconnect or termination, tells the reactor and lets the writer
///    flush before sending a close frame
#[instrument(skip_all, fields(uid))]
pub async fn run_ws_session(
    ws: WebSocket,
    meta: ConnectionMeta,
    inputs: mpsc::Sender<HubInput>,
    send_queue: usize,
    cancel: CancellationToken,
) {
    let (link, mut outbound) = WsLink::new(send_queue, cancel);
    let handle = ConnectionHandle::new(meta, link.clone());
    let _ = tracing::Span::current().record("uid", tracing::field::display(handle.uid()));

    let started = Instant::now();
    info!(address = ?handle.meta().address, "socket connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if inputs.send(HubInput::Opened(handle.clone())).await.is_err() {
        warn!("hub reactor gone, dropping socket");
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws.split();

    let writer_link = Arc::clone(&link);
    let writer = tokio::spawn(async move {
        writer_link.mark_ready();
        loop {
            tokio::select! {
                biased;
                msg = outbound.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                () = writer_link.token().cancelled() => {
                    while let Ok(text) = outbound.try_recv() {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        writer_link.mark_closed();
    });

    loop {
        tokio::select! {
            () = link.token().cancelled() => {
                debug!("socket terminated by hub");
                break;
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(error = %err, "socket read failed");
                        break;
                    }
                };
                if inputs.send(HubInput::Message(handle.clone(), text)).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = inputs.send(HubInput::Closed(handle.clone())).await;
    link.token().cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("writer did not drain in time");
    }
    link.mark_closed();

    info!(dropped = link.drop_count(), "socket disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(started.elapsed().as_secs_f64());
}
