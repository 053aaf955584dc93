//! Client side of a lesson channel.
//!
//! One [`CollabClient`] owns one persistent WebSocket per open lesson. Its
//! lifecycle is an explicit state machine:
//!
//! ```text
//! Idle ──connect()──► Connecting ──► Open ──drop──► Reconnecting ──► Open ...
//!   │                     │            │                 │
//!   └─────────────────────┴────────────┴─disconnect()────┴──► Closed (terminal)
//! ```
//!
//! A server close with code 4000 (session taken over by another connection of
//! the same user) also ends in `Closed`, so two tabs never evict each other in
//! turn. Every other close or transport failure goes to `Reconnecting`.
//!
//! Outbound intents are fire-and-forget: while the channel is not open they are
//! dropped, never queued.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message, Utf8Bytes,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::ws::session::close_code;
use crate::models::{
    ClientMessage, CursorMessage, CursorPosition, EditMessage, SectionFocusMessage, ServerMessage,
    TypingMessage,
};
use super::backoff::{Backoff, BackoffConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTGOING_CAPACITY: usize = 64;

/// How one open channel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was called.
    Disconnected,
    /// The server handed this user's session to a newer connection.
    Replaced,
    /// Anything else: reconnect with backoff.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client has been disconnected")]
    Closed,
    #[error("connect() must be called from within a tokio runtime")]
    NoRuntime,
    #[error("invalid auth token header")]
    InvalidToken,
    #[error("transport error: {0}")]
    Transport(#[from] Box<tungstenite::Error>),
}

/// Receives the lifecycle and inbound traffic of one client.
pub trait CollabHandler: Send + Sync + 'static {
    fn on_open(&self) {}
    fn on_close(&self) {}
    /// Called once per decoded inbound message of a known kind.
    fn on_message(&self, message: ServerMessage);
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Opened,
    Closed,
    Message(ServerMessage),
}

/// Forward everything to a channel, for consumers that prefer a stream of events.
impl CollabHandler for mpsc::UnboundedSender<ClientEvent> {
    fn on_open(&self) {
        let _ = self.send(ClientEvent::Opened);
    }

    fn on_close(&self) {
        let _ = self.send(ClientEvent::Closed);
    }

    fn on_message(&self, message: ServerMessage) {
        let _ = self.send(ClientEvent::Message(message));
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the collaboration server, e.g. `ws://localhost:3000`
    pub server_url: String,
    pub document_id: String,
    pub auth_token: String,
    /// Interval between `ping`s while the channel is open
    pub heartbeat_interval: Duration,
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, document_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            document_id: document_id.into(),
            auth_token: auth_token.into(),
            heartbeat_interval: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/ws/lesson/{}", self.server_url.trim_end_matches('/'), self.document_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    state: Mutex<ConnectionState>,
    /// Present only while the channel is open.
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
}

impl Shared {
    /// Move to `next` unless the client is already closed.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = next;
        true
    }

    /// Enter the terminal state from inside the connection task.
    fn close(&self) {
        *lock(&self.state) = ConnectionState::Closed;
        lock(&self.outgoing).take();
    }

    fn send(&self, message: &ClientMessage) -> bool {
        let outgoing = lock(&self.outgoing);
        let Some(tx) = outgoing.as_ref() else {
            return false;
        };
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {}: {}", message.kind(), e);
                return false;
            }
        };
        tx.try_send(text).is_ok()
    }
}

pub struct CollabClient {
    config: Arc<ClientConfig>,
    handler: Arc<dyn CollabHandler>,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CollabClient {
    /// Stores the configuration; nothing connects until [`CollabClient::connect`].
    pub fn new(config: ClientConfig, handler: Arc<dyn CollabHandler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            handler,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                outgoing: Mutex::new(None),
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn document_id(&self) -> &str {
        &self.config.document_id
    }

    /// Start the connection task. A no-op while already connecting or open;
    /// an error once the client has been disconnected.
    pub fn connect(&self) -> Result<(), ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        {
            let mut state = lock(&self.shared.state);
            match *state {
                ConnectionState::Closed => return Err(ClientError::Closed),
                ConnectionState::Idle => *state = ConnectionState::Connecting,
                _ => return Ok(()),
            }
        }

        let handle = runtime.spawn(run(
            self.config.clone(),
            self.handler.clone(),
            self.shared.clone(),
            self.shutdown.subscribe(),
        ));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Close the channel for good and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut state = lock(&self.shared.state);
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        info!("Disconnecting from lesson {}", self.config.document_id);
        lock(&self.shared.outgoing).take();
        let _ = self.shutdown.send(true);
    }

    /// Wait for the connection task to finish (after [`CollabClient::disconnect`]).
    pub async fn closed(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn send_typing(&self, section_index: u32, is_typing: bool) -> bool {
        self.shared.send(&ClientMessage::Typing(TypingMessage { section_index, field: None, is_typing }))
    }

    pub fn send_field_typing(&self, section_index: u32, field: impl Into<String>, is_typing: bool) -> bool {
        self.shared.send(&ClientMessage::Typing(TypingMessage {
            section_index,
            field: Some(field.into()),
            is_typing,
        }))
    }

    /// Live edit of one field; `persist` also asks the server to store it.
    pub fn send_edit(&self, section_index: u32, field: impl Into<String>, value: impl Into<String>, persist: bool) -> bool {
        self.shared.send(&ClientMessage::Edit(EditMessage {
            section_index,
            field: field.into(),
            value: value.into(),
            persist,
        }))
    }

    pub fn send_section_focus(&self, section_index: u32) -> bool {
        self.shared.send(&ClientMessage::SectionFocus(SectionFocusMessage { section_index }))
    }

    pub fn send_cursor(&self, position: CursorPosition, section_index: Option<u32>) -> bool {
        self.shared.send(&ClientMessage::Cursor(CursorMessage { position, section_index }))
    }

    /// Ask for a presence snapshot; answered with `active_users`.
    pub fn get_active_users(&self) -> bool {
        self.shared.send(&ClientMessage::GetActiveUsers)
    }
}

impl Drop for CollabClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Resolves once shutdown is requested or the client is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn open_socket(config: &ClientConfig) -> Result<WsStream, ClientError> {
    let mut request = config.endpoint().into_client_request().map_err(Box::new)?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.auth_token)).map_err(|_| ClientError::InvalidToken)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(Box::new)?;
    Ok(stream)
}

async fn run(
    config: Arc<ClientConfig>,
    handler: Arc<dyn CollabHandler>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.backoff.clone());
    loop {
        let attempt = tokio::select! {
            result = open_socket(&config) => result,
            _ = shutdown_requested(&mut shutdown) => return,
        };

        match attempt {
            Ok(stream) => {
                if !shared.transition(ConnectionState::Open) {
                    return;
                }
                info!("Connected to lesson {}", config.document_id);
                backoff.reset();
                match serve(stream, &config, handler.as_ref(), &shared, &mut shutdown).await {
                    SessionEnd::Disconnected => return,
                    SessionEnd::Replaced => {
                        // Another connection of this user owns the session now; retrying would evict it
                        info!("Lesson {} was opened elsewhere, not reconnecting", config.document_id);
                        shared.close();
                        return;
                    }
                    SessionEnd::Dropped => {}
                }
            }
            Err(e) => warn!("Connection to lesson {} failed: {}", config.document_id, e),
        }

        if !shared.transition(ConnectionState::Reconnecting) {
            return;
        }
        let delay = backoff.next_delay();
        info!(
            "Reconnecting to lesson {} in {:?} (attempt {})",
            config.document_id,
            delay,
            backoff.attempt()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown) => return,
        }
    }
}

/// Pump one open channel until it ends.
async fn serve(
    stream: WsStream,
    config: &ClientConfig,
    handler: &dyn CollabHandler,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut inbound) = stream.split();
    let (tx, mut outgoing) = mpsc::channel::<String>(OUTGOING_CAPACITY);
    *lock(&shared.outgoing) = Some(tx);

    handler.on_open();
    // Learn who is here without waiting for the next unrelated broadcast
    shared.send(&ClientMessage::GetActiveUsers);

    let period = config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let end = loop {
        tokio::select! {
            _ = shutdown_requested(shutdown) => break SessionEnd::Disconnected,
            text = outgoing.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        debug!("Send failed: {}", e);
                        break SessionEnd::Dropped;
                    }
                }
                // Only disconnect() drops the sender
                None => break SessionEnd::Disconnected,
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), handler),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed lesson {}: {:?}", config.document_id, frame);
                    match frame {
                        Some(frame) if u16::from(frame.code) == close_code::REPLACED => break SessionEnd::Replaced,
                        _ => break SessionEnd::Dropped,
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Lesson {} channel error: {}", config.document_id, e);
                    break SessionEnd::Dropped;
                }
                None => break SessionEnd::Dropped,
            },
            _ = heartbeat.tick() => {
                if let Ok(ping) = ClientMessage::Ping.to_json() {
                    if sink.send(Message::text(ping)).await.is_err() {
                        break SessionEnd::Dropped;
                    }
                }
            }
        }
    };

    lock(&shared.outgoing).take();
    if end == SessionEnd::Disconnected {
        let frame = CloseFrame { code: CloseCode::Normal, reason: Utf8Bytes::from_static("Client disconnect") };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    handler.on_close();
    end
}

fn dispatch(text: &str, handler: &dyn CollabHandler) {
    match ServerMessage::parse(text) {
        Ok(ServerMessage::Unknown) => debug!("Dropping unknown message kind"),
        Ok(message) => handler.on_message(message),
        Err(e) => debug!("Dropping malformed message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl CollabHandler for Silent {
        fn on_message(&self, _message: ServerMessage) {}
    }

    fn client() -> CollabClient {
        CollabClient::new(ClientConfig::new("ws://127.0.0.1:9/", "L1", "token"), Arc::new(Silent))
    }

    #[test]
    fn endpoint_joins_base_and_lesson() {
        let config = ClientConfig::new("ws://localhost:3000/", "lesson-7", "t");
        assert_eq!(config.endpoint(), "ws://localhost:3000/ws/lesson/lesson-7");
    }

    #[test]
    fn constructing_does_not_connect() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(client.document_id(), "L1");
    }

    #[test]
    fn connect_needs_a_runtime() {
        assert!(matches!(client().connect(), Err(ClientError::NoRuntime)));
    }

    #[test]
    fn sends_while_disconnected_are_dropped() {
        let client = client();
        assert!(!client.send_typing(0, true));
        assert!(!client.send_edit(2, "title", "New Title", false));
        assert!(!client.send_section_focus(1));
        assert!(!client.get_active_users());
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = CollabClient::new(ClientConfig::new("ws://127.0.0.1:9", "L1", "token"), Arc::new(tx));
        client.connect().unwrap();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(client.connect(), Err(ClientError::Closed)));

        client.closed().await;
        // Never opened, so no close callback either
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9", "L1", "token");
        config.backoff = BackoffConfig { initial: Duration::from_secs(3600), ..BackoffConfig::default() };
        let client = CollabClient::new(config, Arc::new(Silent));
        client.connect().unwrap();

        for _ in 0..200 {
            if client.state() == ConnectionState::Reconnecting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.disconnect();
        tokio::time::timeout(Duration::from_secs(5), client.closed()).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
