use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::config::SignalingConfig;
use crate::error::{MeetError, Result};
use crate::protocol::{AckResponse, ClientEvent, ClientFrame, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the signaling client hands to the rest of the session
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connection is up and the server assigned this identity.
    Connected { identity: String },
    Server(ServerEvent),
    /// The connection dropped. Every identity-scoped resource is stale.
    Disconnected,
}

/// Outbound half of the signaling channel, as seen by the mesh, the screen
/// share and the recording coordinator.
pub trait SignalingChannel: Send + Sync {
    /// Identity issued by the server for the current connection.
    fn local_id(&self) -> Option<String>;

    /// Fire-and-forget. Dropped while disconnected.
    fn emit(&self, event: ClientEvent);

    /// Send with an acknowledgement. The receiver errors when the
    /// connection drops before the server answers.
    fn request(&self, event: ClientEvent) -> oneshot::Receiver<AckResponse>;
}

/// Exponential reconnect delay with random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Next delay: `base * 2^attempt` capped at `max`, minus up to a quarter of jitter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_ms = (delay.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay - Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

struct Shared {
    identity: watch::Sender<Option<String>>,
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<AckResponse>>>,
    next_ack: AtomicU64,
}

impl Shared {
    fn fail_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Failing pending acknowledgements");
        }
        // dropping the senders resolves every receiver with an error
        pending.clear();
    }

    fn resolve(&self, id: u64, response: AckResponse) {
        let sender = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&id)
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => tracing::debug!(ack_id = id, "Acknowledgement for unknown request"),
        }
    }
}

/// WebSocket client for the rendezvous server. Runs its own task that
/// reconnects with backoff; events arrive on the receiver returned by
/// [`SignalingClient::spawn`].
pub struct SignalingClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    shutdown: watch::Sender<bool>,
}

impl SignalingClient {
    pub fn spawn(config: SignalingConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (identity, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            identity,
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(run(config, shared.clone(), outbound_rx, events_tx, shutdown_rx));

        (
            Arc::new(Self {
                shared,
                outbound,
                shutdown,
            }),
            events_rx,
        )
    }

    /// Spawn and wait for the first identity.
    pub async fn connect(
        config: SignalingConfig,
    ) -> Result<(Arc<Self>, String, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let timeout = config.ack_timeout;
        let (client, events) = Self::spawn(config);
        match client.wait_identity(timeout).await {
            Ok(identity) => Ok((client, identity, events)),
            Err(e) => {
                client.disconnect();
                Err(e)
            }
        }
    }

    pub async fn wait_identity(&self, timeout: Duration) -> Result<String> {
        let mut rx = self.shared.identity.subscribe();
        let identity = tokio::time::timeout(timeout, async move {
            rx.wait_for(|id| id.is_some())
                .await
                .map(|id| id.clone().unwrap_or_default())
                .map_err(|_| MeetError::ConnectionLost)
        })
        .await
        .map_err(|_| MeetError::Timeout("waiting for session identity".to_string()))??;
        Ok(identity)
    }

    pub fn identity(&self) -> watch::Receiver<Option<String>> {
        self.shared.identity.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn join_room(&self, room_id: &str, name: &str) {
        self.emit(ClientEvent::JoinRoom {
            room_id: room_id.to_string(),
            name: name.to_string(),
        });
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    fn send_frame(&self, frame: ClientFrame) -> bool {
        if !self.is_connected() {
            tracing::debug!(event = ?frame.event, "Dropping emit while disconnected");
            return false;
        }
        if self.outbound.send(frame).is_err() {
            tracing::debug!("Signaling task has stopped, dropping emit");
            return false;
        }
        true
    }
}

impl SignalingChannel for SignalingClient {
    fn local_id(&self) -> Option<String> {
        self.shared.identity.borrow().clone()
    }

    fn emit(&self, event: ClientEvent) {
        self.send_frame(ClientFrame::new(event));
    }

    fn request(&self, event: ClientEvent) -> oneshot::Receiver<AckResponse> {
        let (tx, rx) = oneshot::channel();
        if !self.is_connected() {
            tracing::debug!(event = ?event, "Request while disconnected fails immediately");
            return rx;
        }

        let id = self.shared.next_ack.fetch_add(1, Ordering::SeqCst);
        {
            let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(id, tx);
        }

        if !self.send_frame(ClientFrame::with_ack(event, id)) {
            let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&id);
        }
        rx
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run(
    config: SignalingConfig,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tracing::debug!(url = %config.url, "Connecting to signaling server");
        let connected = tokio::select! {
            result = connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _)) => {
                tracing::info!(url = %config.url, "Signaling connection established");
                let had_identity =
                    serve_connection(stream, &shared, &mut outbound, &events, &mut shutdown, &mut backoff)
                        .await;
                reset_connection_state(&shared, &mut outbound);
                if had_identity {
                    let _ = events.send(ChannelEvent::Disconnected);
                }
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "Signaling connection failed");
            }
        }

        if *shutdown.borrow() {
            break;
        }

        let delay = backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to signaling server");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    reset_connection_state(&shared, &mut outbound);
    tracing::info!("Signaling client stopped");
}

fn reset_connection_state(shared: &Shared, outbound: &mut mpsc::UnboundedReceiver<ClientFrame>) {
    shared.connected.store(false, Ordering::SeqCst);
    shared.identity.send_replace(None);
    shared.fail_pending();
    // frames queued for the dead connection must not leak into the next one
    while outbound.try_recv().is_ok() {}
}

/// Pump one connection until it drops. Returns whether an identity was issued.
async fn serve_connection(
    stream: WsStream,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> bool {
    let (mut write, mut read) = stream.split();
    let mut had_identity = false;

    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match ServerEvent::decode(&text) {
                            Ok(ServerEvent::Me(identity)) => {
                                tracing::info!(identity = %identity, "Signaling identity assigned");
                                had_identity = true;
                                backoff.reset();
                                shared.identity.send_replace(Some(identity.clone()));
                                shared.connected.store(true, Ordering::SeqCst);
                                let _ = events.send(ChannelEvent::Connected { identity });
                            }
                            Ok(ServerEvent::Ack { id, response }) => shared.resolve(id, response),
                            Ok(event) => {
                                let _ = events.send(ChannelEvent::Server(event));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, raw_message = %text, "Failed to parse server event");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Signaling connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Signaling connection error");
                        break;
                    }
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "Failed to send signaling frame");
                    break;
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    had_identity
}
