//! Websocket driver for a stream session
//!
//! Each session runs in its own task that owns the socket. The task is
//! controlled through `SessionCommand`s, publishes its `SessionStatus` on a
//! watch channel and broadcasts market data and state changes to listeners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdstream_core::{decode_frame, Endpoint, InboundMessage, Token, TransportError, WS_SUBPROTOCOL};

use crate::machine::{Action, SessionCore, SessionSettings};
use crate::state::{CloseReason, ReconnectMode, SessionState, SessionStatus};

/// Default websocket connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const COMMAND_BUFFER: usize = 32;
const UPDATE_BUFFER: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ============================================================================
// Configuration & Messages
// ============================================================================

/// Configuration for StreamSession
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub settings: SessionSettings,
    /// Connect with `wss://`
    pub tls: bool,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settings: SessionSettings::default(),
            tls: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Command sent to a session task
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Connect (or reconnect) with this token
    Connect(Arc<Token>),
    /// Adopt a renewed token
    PushToken(Arc<Token>),
    Disconnect,
}

/// Update broadcast by session tasks
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Market data message received by a session
    Market {
        session: String,
        message: InboundMessage,
    },
    /// Session state change
    State {
        session: String,
        state: SessionState,
        reason: Option<CloseReason>,
    },
}

/// Channel shared by every session of an orchestrator
pub fn update_channel() -> (broadcast::Sender<SessionUpdate>, broadcast::Receiver<SessionUpdate>) {
    broadcast::channel(UPDATE_BUFFER)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session {0} has stopped")]
    Stopped(String),
}

/// Control surface the orchestrator uses for each session
#[async_trait]
pub trait SessionControl: Send + Sync {
    fn name(&self) -> &str;

    fn endpoint(&self) -> &Endpoint;

    fn reconnect_mode(&self) -> ReconnectMode;

    fn status(&self) -> SessionStatus;

    async fn connect(&self, token: Arc<Token>) -> Result<(), SessionError>;

    async fn push_token(&self, token: Arc<Token>) -> Result<(), SessionError>;

    async fn disconnect(&self) -> Result<(), SessionError>;

    /// Disconnect, cancel and wait for the task to finish
    async fn shutdown(&mut self, timeout: Duration);
}

// ============================================================================
// Session Handle
// ============================================================================

/// Owner's handle to a running session task.
///
/// Dropping the handle cancels the task, closing its socket and any pending
/// reconnect timer.
pub struct SessionHandle {
    name: String,
    endpoint: Endpoint,
    reconnect_mode: ReconnectMode,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped(self.name.clone()))
    }
}

#[async_trait]
impl SessionControl for SessionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn reconnect_mode(&self) -> ReconnectMode {
        self.reconnect_mode
    }

    fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    async fn connect(&self, token: Arc<Token>) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect(token)).await
    }

    async fn push_token(&self, token: Arc<Token>) -> Result<(), SessionError> {
        self.send(SessionCommand::PushToken(token)).await
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect).await
    }

    async fn shutdown(&mut self, wait: Duration) {
        let _ = self.commands.try_send(SessionCommand::Disconnect);
        self.cancel.cancel();

        let Some(task) = self.task.take() else {
            return;
        };
        let abort = task.abort_handle();
        match timeout(wait, task).await {
            Ok(Ok(())) => debug!("[{}] Session task finished", self.name),
            Ok(Err(e)) => error!("[{}] Session task failed: {}", self.name, e),
            Err(_) => {
                warn!("[{}] Session task did not stop within {:?}; aborting", self.name, wait);
                abort.abort();
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Session Task
// ============================================================================

/// Session task state; created through [`StreamSession::spawn`]
pub struct StreamSession {
    core: SessionCore,
    endpoint: Endpoint,
    tls: bool,
    connect_timeout: Duration,
    commands: mpsc::Receiver<SessionCommand>,
    status: watch::Sender<SessionStatus>,
    updates: broadcast::Sender<SessionUpdate>,
    cancel: CancellationToken,
    /// A `Connect` arrived and waits for the reconnect delay
    pending_connect: bool,
    published_state: SessionState,
}

impl StreamSession {
    /// Start a session task for `endpoint`. It stays idle until the first `Connect`.
    pub fn spawn(
        name: impl Into<String>,
        endpoint: Endpoint,
        config: SessionConfig,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> SessionHandle {
        let name = name.into();
        let reconnect_mode = config.settings.reconnect_mode;
        let core = SessionCore::new(name.clone(), config.settings);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(core.status());
        let cancel = CancellationToken::new();

        let session = StreamSession {
            published_state: core.state(),
            core,
            endpoint: endpoint.clone(),
            tls: config.tls,
            connect_timeout: config.connect_timeout,
            commands: command_rx,
            status: status_tx,
            updates,
            cancel: cancel.clone(),
            pending_connect: false,
        };
        let task = tokio::spawn(session.run());

        SessionHandle {
            name,
            endpoint,
            reconnect_mode,
            commands: command_tx,
            status: status_rx,
            cancel,
            task: Some(task),
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    async fn run(mut self) {
        info!("[{}] Session started for {}", self.name(), self.endpoint);

        while self.core.state() != SessionState::Closed {
            let now = Instant::now();
            let wake_at = if self.pending_connect {
                Some(self.core.reconnect_at().unwrap_or(now))
            } else {
                self.core.autonomous_reconnect_at(now)
            };

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.core.request_disconnect();
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_idle_command(command),
                    None => {
                        debug!("[{}] Handle dropped", self.name());
                        self.core.request_disconnect();
                    }
                },

                _ = sleep_until(wake_at.unwrap_or(now)), if wake_at.is_some() => {
                    self.pending_connect = false;
                    self.connect_and_serve().await;
                }
            }
            self.publish_status();
        }

        info!("[{}] Session stopped", self.name());
    }

    fn handle_idle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect(token) => {
                self.core.push_token(token);
                if self.core.can_connect() {
                    self.pending_connect = true;
                } else {
                    debug!("[{}] Ignoring connect in state {}", self.name(), self.core.state());
                }
            }
            SessionCommand::PushToken(token) => {
                self.core.push_token(token);
            }
            SessionCommand::Disconnect => {
                self.core.request_disconnect();
            }
        }
    }

    async fn connect_and_serve(&mut self) {
        if !self.core.begin_connect(Instant::now()) {
            warn!("[{}] Cannot connect in state {}", self.name(), self.core.state());
            return;
        }
        self.publish_status();

        let url = self.endpoint.ws_url(self.tls);
        info!("[{}] Connecting to {}", self.name(), url);

        let connect = timeout(self.connect_timeout, open_socket(&url));
        tokio::pin!(connect);

        let ws_stream = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.core.request_disconnect();
                    self.finish(CloseReason::Requested);
                    return;
                }

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Connect(token)) | Some(SessionCommand::PushToken(token)) => {
                        self.core.push_token(token);
                    }
                    Some(SessionCommand::Disconnect) | None => {
                        self.core.request_disconnect();
                        self.finish(CloseReason::Requested);
                        return;
                    }
                },

                result = &mut connect => match result {
                    Ok(Ok(stream)) => break stream,
                    Ok(Err(e)) => {
                        error!("[{}] Connection failed: {}", self.name(), e);
                        self.finish(CloseReason::Transport(e.to_string()));
                        return;
                    }
                    Err(_) => {
                        error!("[{}] Connection timed out after {:?}", self.name(), self.connect_timeout);
                        self.finish(CloseReason::Transport(format!(
                            "connect timed out after {:?}",
                            self.connect_timeout
                        )));
                        return;
                    }
                }
            }
        };

        info!("[{}] Connected to {}", self.name(), self.endpoint);
        let reason = self.serve(ws_stream).await;
        self.finish(reason);
    }

    /// Read loop of one connection; returns why it ended
    async fn serve(&mut self, ws_stream: WsStream) -> CloseReason {
        let (mut write, mut read) = ws_stream.split();

        let actions = self.core.on_open(Instant::now());
        if let Err(reason) = self.apply(&mut write, actions).await {
            close_socket(&mut write).await;
            return reason;
        }

        loop {
            let heartbeat = self.core.heartbeat_deadline();

            let result = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.core.request_disconnect();
                    Err(CloseReason::Requested)
                }

                command = self.commands.recv() => {
                    let actions = match command {
                        Some(SessionCommand::PushToken(token)) | Some(SessionCommand::Connect(token)) => {
                            self.core.push_token(token)
                        }
                        Some(SessionCommand::Disconnect) | None => self.core.request_disconnect(),
                    };
                    self.apply(&mut write, actions).await
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_frame(&mut write, &text).await,
                    Some(Ok(Message::Ping(data))) => write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| CloseReason::Transport(e.to_string())),
                    Some(Ok(Message::Close(frame))) => {
                        info!("[{}] Connection closed by server", self.name());
                        Err(CloseReason::Transport(match frame {
                            Some(frame) => format!("closed by server: {}", frame.reason.as_str()),
                            None => "closed by server".to_string(),
                        }))
                    }
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => {
                        error!("[{}] Error: {}", self.name(), e);
                        Err(CloseReason::Transport(e.to_string()))
                    }
                    None => Err(CloseReason::Transport("stream ended".to_string())),
                },

                _ = sleep_until(heartbeat.unwrap_or_else(Instant::now)), if heartbeat.is_some() => {
                    let actions = self.core.on_heartbeat(Instant::now());
                    self.apply(&mut write, actions).await
                }
            };

            if let Err(reason) = result {
                close_socket(&mut write).await;
                return reason;
            }
        }
    }

    /// Handle a frame one message at a time. Each message's actions are
    /// written before the next message is processed; a close stops the frame.
    async fn on_frame(&mut self, write: &mut WsSink, text: &str) -> Result<(), CloseReason> {
        let messages = match decode_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("[{}] Dropping frame: {}", self.name(), e);
                return Ok(());
            }
        };

        for message in messages {
            match message {
                Ok(message) => {
                    let actions = self.core.on_message(message, Instant::now());
                    self.apply(write, actions).await?;
                }
                Err(e) => warn!("[{}] Dropping message: {}", self.name(), e),
            }
        }
        Ok(())
    }

    async fn apply(&mut self, write: &mut WsSink, actions: Vec<Action>) -> Result<(), CloseReason> {
        for action in actions {
            match action {
                Action::Send(message) => {
                    let json = message
                        .to_json()
                        .map_err(|e| CloseReason::Transport(format!("failed to encode message: {}", e)))?;
                    if message.is_login() {
                        debug!("[{}] Sending login", self.name());
                    } else {
                        debug!("[{}] Sending {}", self.name(), json);
                    }
                    write
                        .send(Message::Text(json.into()))
                        .await
                        .map_err(|e| CloseReason::Transport(e.to_string()))?;
                }
                Action::Publish(message) => {
                    let _ = self.updates.send(SessionUpdate::Market {
                        session: self.name().to_string(),
                        message,
                    });
                }
                Action::Close(reason) => return Err(reason),
            }
        }
        self.publish_status();
        Ok(())
    }

    fn finish(&mut self, reason: CloseReason) {
        self.core.on_closed(reason, Instant::now());
        self.publish_status();
    }

    fn publish_status(&mut self) {
        let status = self.core.status();
        if status.state != self.published_state {
            self.published_state = status.state;
            let reason = match status.state {
                SessionState::Reconnecting | SessionState::Closed => status.last_close.clone(),
                _ => None,
            };
            let _ = self.updates.send(SessionUpdate::State {
                session: self.name().to_string(),
                state: status.state,
                reason,
            });
        }
        self.status.send_replace(status);
    }
}

async fn open_socket(url: &str) -> Result<WsStream, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::new(format!("invalid websocket URL {}: {}", url, e)))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| TransportError::new(e.to_string()))?;
    Ok(stream)
}

async fn close_socket(write: &mut WsSink) {
    let _ = timeout(CLOSE_TIMEOUT, write.close()).await;
}
