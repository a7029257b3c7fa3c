//! WebSocket session lifecycle: one connected peer from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broker::{Broker, ClientKey};
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

use super::connection::ClientConnection;
use super::handler::{Phase, Step, handle_first_message, reject_malformed};
use super::heartbeat::{Heartbeat, Liveness};

/// How long a closing session waits for its writer to flush.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a WebSocket session for a connected peer.
///
/// 1. Spawns a writer that forwards queued messages and sends periodic pings
/// 2. Dispatches the first text message as a command or route
/// 3. In route mode, refreshes the client's `last_seen` on every frame
/// 4. Detaches the client when the transport closes
#[instrument(skip_all, fields(peer = %peer))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer: SocketAddr,
    broker: Arc<Broker>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::unbounded_channel::<String>();
    let connection = Arc::new(ClientConnection::new(peer, send_tx));
    let key = broker.client_key(peer);

    let started = tokio::time::Instant::now();
    info!(conn_id = %connection.id, client = %key, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let closing = shutdown.child_token();
    let mut writer = spawn_writer(
        ws_tx,
        send_rx,
        connection.clone(),
        Heartbeat::from_config(&config),
        closing.clone(),
    );
    let mut finished = None;
    let mut phase = Phase::AwaitingFirstMessage;

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            outcome = &mut writer => {
                finished = Some(outcome);
                break;
            }
            () = shutdown.cancelled() => {
                debug!(conn_id = %connection.id, "server shutting down, closing session");
                break;
            }
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(conn_id = %connection.id, error = %err, "websocket read error");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => Some(t.to_string()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(s) => Some(s.to_owned()),
                Err(_) => {
                    info!(conn_id = %connection.id, len = data.len(), "received non-UTF8 binary frame");
                    match phase {
                        Phase::AwaitingFirstMessage => {
                            reject_malformed(&connection);
                            continue;
                        }
                        Phase::RouteMode => break,
                    }
                }
            },
            Message::Close(_) => {
                debug!(conn_id = %connection.id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };

        match phase {
            Phase::RouteMode => broker.touch(&key),
            Phase::AwaitingFirstMessage => {
                let Some(text) = text else { continue };
                match handle_first_message(&text, &broker, &connection, key) {
                    Step::Await => {}
                    Step::Subscribe => phase = Phase::RouteMode,
                    Step::Close => break,
                }
            }
        }
    }

    let _ = broker.detach(&key, &connection.id);
    closing.cancel();
    let outcome = match finished {
        Some(outcome) => outcome,
        None => match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("writer did not flush in time, aborting");
                writer.abort();
                Ok(Vec::new())
            }
        },
    };
    let unsent = outcome.unwrap_or_else(|err| {
        warn!(error = %err, "writer task failed");
        Vec::new()
    });
    hand_back(&broker, &key, &connection, unsent);
    drop(connection);

    info!(client = %key, ?phase, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Return what the writer could not put on the wire.
///
/// A subscriber always reports, even with nothing unsent, so its record's
/// hand-off settles. Command replies are dropped.
fn hand_back(broker: &Broker, key: &ClientKey, connection: &ClientConnection, unsent: Vec<String>) {
    if connection.is_subscribed() {
        let _ = broker.restore_undelivered(key, &connection.id, unsent);
    } else if !unsent.is_empty() {
        debug!(conn_id = %connection.id, dropped = unsent.len(), "discarding unsent command replies");
    }
}

/// Spawn the outbound half: forwards queued text, pings every
/// `heartbeat.interval`, and gives up on a peer the heartbeat judges
/// unresponsive.
///
/// On `closing` it flushes whatever is still queued and closes the socket.
/// A retired connection writes nothing more. The task yields the messages
/// it took off the queue but never wrote, oldest first.
fn spawn_writer<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::UnboundedReceiver<String>,
    connection: Arc<ClientConnection>,
    heartbeat: Heartbeat,
    closing: CancellationToken,
) -> JoinHandle<Vec<String>>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ping = heartbeat.ticker();

        let (writable, failed) = loop {
            tokio::select! {
                biased;

                () = connection.retired() => {
                    debug!(conn_id = %connection.id, "connection replaced, handing back queue");
                    break (false, None);
                }
                () = closing.cancelled() => break (true, None),
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.clone().into())).await.is_err() {
                            break (false, Some(text));
                        }
                    }
                    None => break (true, None),
                },
                _ = ping.tick() => {
                    if heartbeat.check(&connection) == Liveness::Unresponsive {
                        warn!(conn_id = %connection.id, "client unresponsive for {:?}, disconnecting", heartbeat.timeout);
                        break (false, None);
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break (false, None);
                    }
                }
            }
        };

        send_rx.close();
        let mut unsent: Vec<String> = failed.into_iter().collect();
        while let Ok(text) = send_rx.try_recv() {
            if writable
                && unsent.is_empty()
                && ws_tx.send(Message::Text(text.clone().into())).await.is_ok()
            {
                continue;
            }
            unsent.push(text);
        }
        let _ = ws_tx.close().await;
        unsent
    })
}
