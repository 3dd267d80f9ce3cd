//! Socket supervision: one live channel at a time, exponential reconnect,
//! best-effort sends.

mod backoff;

pub use backoff::ReconnectPolicy;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use krushr_proto::ClientEvent;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt`.
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Retry budget exhausted; only an explicit `connect()` starts over.
    Offline,
}

struct State {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    authenticated: AtomicBool,
    channels_opened: AtomicU64,
    state: Mutex<State>,
    status: watch::Sender<ConnectionStatus>,
    inbound: mpsc::UnboundedSender<String>,
}

/// Owns the socket to the realtime server.
///
/// Text frames received on the socket are forwarded, in order, to the
/// receiver returned by [`ConnectionManager::new`].
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (inbound, frames) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let inner = Inner {
            url: url.into(),
            policy,
            authenticated: AtomicBool::new(false),
            channels_opened: AtomicU64::new(0),
            state: Mutex::new(State {
                generation: 0,
                outbound: None,
                shutdown: None,
                supervisor: None,
                reconnect_attempts: 0,
            }),
            status,
            inbound,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            frames,
        )
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Logging out tears the channel down.
    pub fn set_authenticated(&self, authenticated: bool) {
        let was = self.inner.authenticated.swap(authenticated, Ordering::SeqCst);
        if was && !authenticated {
            self.disconnect();
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    /// Opens the channel unless one is already live or being (re)established.
    /// Returns whether a new supervisor was started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> bool {
        if !self.is_authenticated() {
            debug!(target: "realtime::connection", "connect skipped: not authenticated");
            return false;
        }
        let mut state = self.inner.state.lock();
        if state
            .supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            trace!(target: "realtime::connection", "connect skipped: channel already live");
            return false;
        }
        state.generation += 1;
        state.reconnect_attempts = 0;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        state.shutdown = Some(shutdown_tx);
        let generation = state.generation;
        let inner = self.inner.clone();
        state.supervisor = Some(tokio::spawn(supervise(inner, generation, shutdown_rx)));
        true
    }

    /// Closes the channel without scheduling a reconnect.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.outbound = None;
        state.reconnect_attempts = 0;
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(());
        }
        // The supervisor finishes on its own after sending a close frame.
        state.supervisor = None;
        drop(state);
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
        info!(target: "realtime::connection", "disconnected");
    }

    /// Best-effort send. Dropped (and `false` returned) when not connected.
    pub fn send(&self, event: ClientEvent) -> bool {
        let name = event.name();
        let text = event.into_envelope(OffsetDateTime::now_utc()).to_json();
        self.send_text(name, text)
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.send_text("raw", text.into())
    }

    fn send_text(&self, name: &str, text: String) -> bool {
        let state = self.inner.state.lock();
        match &state.outbound {
            Some(tx) if tx.send(Message::Text(text)).is_ok() => true,
            _ => {
                debug!(
                    target: "realtime::connection",
                    event = name,
                    "dropping outbound message while disconnected"
                );
                false
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect_attempts
    }

    /// Number of sockets successfully opened over this manager's lifetime.
    pub fn channels_opened(&self) -> u64 {
        self.inner.channels_opened.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn set_status(&self, generation: u64, status: ConnectionStatus) {
        if self.is_current(generation) {
            self.status.send_replace(status);
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

async fn supervise(inner: Arc<Inner>, generation: u64, mut shutdown: oneshot::Receiver<()>) {
    loop {
        inner.set_status(generation, ConnectionStatus::Connecting);
        let opened = tokio::select! {
            _ = &mut shutdown => return,
            result = connect_async(inner.url.as_str()) => result,
        };

        match opened {
            Ok((stream, _response)) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                {
                    let mut state = inner.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.reconnect_attempts = 0;
                    state.outbound = Some(outbound_tx);
                }
                inner.channels_opened.fetch_add(1, Ordering::SeqCst);
                inner.set_status(generation, ConnectionStatus::Connected);
                info!(target: "realtime::connection", url = %inner.url, "connected");

                let end = run_channel(&inner, stream, outbound_rx, &mut shutdown).await;
                {
                    let mut state = inner.state.lock();
                    if state.generation == generation {
                        state.outbound = None;
                    }
                }
                if let SessionEnd::Shutdown = end {
                    return;
                }
                warn!(target: "realtime::connection", "connection lost");
            }
            Err(err) => {
                warn!(target: "realtime::connection", error = %err, url = %inner.url, "connect failed");
            }
        }

        let next = {
            let mut state = inner.state.lock();
            if state.generation != generation {
                return;
            }
            let attempts = state.reconnect_attempts;
            let delay = inner.policy.delay_for(attempts);
            if delay.is_some() {
                state.reconnect_attempts += 1;
            }
            delay.map(|delay| (attempts + 1, delay))
        };

        let Some((attempt, delay)) = next else {
            inner.set_status(generation, ConnectionStatus::Offline);
            error!(
                target: "realtime::connection",
                max_attempts = inner.policy.max_attempts,
                "reconnect attempts exhausted; staying offline"
            );
            return;
        };

        inner.set_status(generation, ConnectionStatus::Reconnecting { attempt, delay });
        info!(
            target: "realtime::connection",
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_channel<S>(
    inner: &Inner,
    stream: S,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                if let Err(err) = write.send(message).await {
                    warn!(target: "realtime::connection", error = %err, "socket write failed");
                    return SessionEnd::Lost;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inner.inbound.send(text).is_err() {
                        debug!(target: "realtime::connection", "dispatcher gone; closing channel");
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "realtime::connection", ?frame, "server closed channel");
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "realtime::connection", error = %err, "socket read failed");
                    return SessionEnd::Lost;
                }
                None => return SessionEnd::Lost,
            }
        }
    }
}
