//! Local WebSocket server and helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use krushr_realtime::ConnectionStatus;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum ServerCommand {
    Text(String),
    Close,
}

#[derive(Clone)]
struct ServerState {
    accepted: Arc<AtomicUsize>,
    commands: broadcast::Sender<ServerCommand>,
    received: mpsc::UnboundedSender<String>,
}

pub struct TestServer {
    pub url: String,
    accepted: Arc<AtomicUsize>,
    commands: broadcast::Sender<ServerCommand>,
    received: AsyncMutex<mpsc::UnboundedReceiver<String>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let accepted = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(16);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let state = ServerState {
            accepted: accepted.clone(),
            commands: commands.clone(),
            received: received_tx,
        };
        let router = Router::new().route("/ws", get(ws_handler)).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Self {
            url: format!("ws://{addr}/ws"),
            accepted,
            commands,
            received: AsyncMutex::new(received_rx),
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits until the server side of `count` sockets is ready for commands.
    pub async fn wait_accepted(&self, count: usize) {
        timeout(WAIT, async {
            while self.accepted() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server accepted in time");
    }

    pub fn push(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Text(text.to_string()));
    }

    pub fn close_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    pub async fn next_received(&self) -> String {
        timeout(WAIT, self.received.lock().await.recv())
            .await
            .expect("server frame in time")
            .expect("server still running")
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let mut commands = state.commands.subscribe();
    state.accepted.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(ServerCommand::Text(text)) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::Close) | Err(_) => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = state.received.send(text);
                }
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

pub async fn wait_for_status<F>(status: &mut watch::Receiver<ConnectionStatus>, predicate: F)
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    timeout(WAIT, status.wait_for(predicate))
        .await
        .expect("status reached in time")
        .expect("status channel open");
}
