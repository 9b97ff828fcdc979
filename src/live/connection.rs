//! Connection lifecycle management for the live streaming client.
//!
//! One supervisor task per connection drives the state machine
//! `Idle → Connecting → Connected → Closing → Closed` (with `Reconnecting`
//! re-entering `Connecting` on mid-session transport loss). While
//! `Connected`, two subordinate tasks own the socket exclusively: the
//! writer drains the bounded outbound queue into the sink and injects
//! keepalive frames when idle, the reader decodes inbound frames and
//! dispatches them to listeners in receipt order.
//!
//! State is owned by the supervisor and published through a `watch`
//! channel; callers observe it read-only, so no caller can force an
//! inconsistent transition. A reconnect fully retires the old
//! reader/writer pair before a new socket is constructed.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::dispatcher::ListenerRegistry;
use super::options::{query_string, LiveOptions, StreamSettings};
use super::protocol::{decode_event, ControlMessage, LiveEvent, OutboundFrame};
use super::LiveError;
use crate::config::ClientConfig;

/// Timeout for the initial websocket handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable lifecycle states of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Graceful half-close in progress; new audio is rejected
    Closing,
    /// Transport lost, waiting out the backoff before the next attempt
    Reconnecting,
    /// Terminal for this connection instance
    Closed,
}

/// Requests sent from the facade to the supervisor.
pub(crate) enum Command {
    /// Begin the graceful half-close; `done` resolves when Closed is reached.
    Finish { done: oneshot::Sender<()> },
}

/// Channel endpoints the facade holds for one connection.
pub(crate) struct ConnectionHandle {
    pub(crate) frame_tx: mpsc::Sender<OutboundFrame>,
    pub(crate) command_tx: mpsc::UnboundedSender<Command>,
    pub(crate) state_rx: watch::Receiver<ConnectionState>,
    pub(crate) cancel: CancellationToken,
    /// Set by the first `finish` call so a second one is rejected
    pub(crate) finishing: Arc<AtomicBool>,
    /// Sequence counter for audio chunks on this connection
    pub(crate) next_sequence: Arc<AtomicU64>,
}

/// Spawns the supervisor task for a new connection.
///
/// The returned receiver resolves once the first handshake has either
/// succeeded (connection is up) or failed fatally.
pub(crate) fn spawn_connection(
    config: ClientConfig,
    options: LiveOptions,
    settings: StreamSettings,
    registry: Arc<ListenerRegistry>,
) -> (ConnectionHandle, oneshot::Receiver<Result<(), LiveError>>) {
    let (frame_tx, frame_rx) = mpsc::channel(settings.queue_capacity.max(1));
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let (ready_tx, ready_rx) = oneshot::channel();
    let cancel = CancellationToken::new();

    tokio::spawn(run_connection(
        config,
        options,
        settings,
        registry,
        frame_rx,
        command_rx,
        state_tx,
        cancel.clone(),
        ready_tx,
    ));

    let handle = ConnectionHandle {
        frame_tx,
        command_tx,
        state_rx,
        cancel,
        finishing: Arc::new(AtomicBool::new(false)),
        next_sequence: Arc::new(AtomicU64::new(0)),
    };
    (handle, ready_rx)
}

enum SessionOutcome {
    /// Graceful close completed (peer echo or drain timeout)
    Finished,
    /// Caller-forced teardown or client handle dropped
    Forced,
    /// Socket lost unexpectedly; reconnect policy decides what happens next
    Transport(String),
}

enum WriterExit {
    Cancelled,
    /// All frame senders dropped (client handle gone)
    QueueClosed,
    WriteError(String),
}

enum ReaderExit {
    Cancelled,
    PeerClose,
    StreamEnded,
    ReadError(String),
}

/// Supervisor: connect loop, reconnection, terminal teardown.
#[allow(clippy::too_many_arguments)]
async fn run_connection(
    config: ClientConfig,
    options: LiveOptions,
    settings: StreamSettings,
    registry: Arc<ListenerRegistry>,
    frame_rx: mpsc::Receiver<OutboundFrame>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), LiveError>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut frame_rx = Some(frame_rx);
    let mut finish_acks: Vec<oneshot::Sender<()>> = Vec::new();
    let mut attempts: u32 = 0;
    let mut was_connected = false;
    let mut fatal_error: Option<LiveError> = None;

    'connect: loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let connect_result = tokio::select! {
            _ = cancel.cancelled() => break 'connect,
            result = open_socket(&config, &options) => result,
        };

        match connect_result {
            Ok(socket) => {
                attempts = 0;
                was_connected = true;
                state_tx.send_replace(ConnectionState::Connected);
                if let Some(ready) = ready_tx.take() {
                    let _ = ready.send(Ok(()));
                }
                log::info!("live connection established");
                registry.dispatch(&LiveEvent::Open);

                let rx = match frame_rx.take() {
                    Some(rx) => rx,
                    None => break 'connect,
                };
                let (rx_back, outcome) = run_session(
                    socket,
                    rx,
                    &mut command_rx,
                    &state_tx,
                    &registry,
                    &settings,
                    &cancel,
                    &mut finish_acks,
                )
                .await;
                frame_rx = rx_back;

                match outcome {
                    SessionOutcome::Finished => {
                        log::info!("live connection finished cleanly");
                        break 'connect;
                    }
                    SessionOutcome::Forced => break 'connect,
                    SessionOutcome::Transport(reason) => {
                        log::warn!("live transport error: {}", reason);
                    }
                }
            }
            Err(err) => {
                if ready_tx.is_some() {
                    // First handshake: credential/endpoint errors are not
                    // transient, so this is fatal and never retried. The
                    // ready channel resolves after the terminal state is
                    // published below.
                    log::warn!("initial connect failed: {}", err);
                    fatal_error = Some(err);
                    break 'connect;
                }
                log::warn!("reconnect attempt failed: {}", err);
            }
        }

        // Transport loss (or a failed reconnect attempt): retry per policy.
        if frame_rx.is_none() {
            break;
        }
        if !settings.reconnect.enabled {
            log::warn!("reconnect disabled, closing");
            break;
        }
        if attempts >= settings.reconnect.max_attempts {
            log::warn!(
                "reconnect attempts exhausted ({}), closing",
                settings.reconnect.max_attempts
            );
            break;
        }
        attempts += 1;
        state_tx.send_replace(ConnectionState::Reconnecting);
        let delay = settings.reconnect.backoff_for(attempts);
        log::info!(
            "reconnecting in {:?} (attempt {}/{})",
            delay,
            attempts,
            settings.reconnect.max_attempts
        );
        tokio::select! {
            _ = cancel.cancelled() => break 'connect,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
    if let Some(ready) = ready_tx.take() {
        let err = fatal_error.take().unwrap_or_else(|| {
            LiveError::Handshake("connection closed before startup completed".to_string())
        });
        let _ = ready.send(Err(err));
    }
    if was_connected {
        registry.dispatch(&LiveEvent::Close);
    }
    for done in finish_acks.drain(..) {
        let _ = done.send(());
    }
    log::info!("live connection closed");
}

/// Runs one connected session until it resolves to an outcome.
///
/// Returns the outbound queue receiver so pending frames survive a
/// reconnect (audio is never silently dropped).
#[allow(clippy::too_many_arguments)]
async fn run_session(
    socket: WsStream,
    frame_rx: mpsc::Receiver<OutboundFrame>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    state_tx: &watch::Sender<ConnectionState>,
    registry: &Arc<ListenerRegistry>,
    settings: &StreamSettings,
    cancel: &CancellationToken,
    finish_acks: &mut Vec<oneshot::Sender<()>>,
) -> (Option<mpsc::Receiver<OutboundFrame>>, SessionOutcome) {
    let (sink, stream) = socket.split();
    let session = cancel.child_token();
    let mut writer = tokio::spawn(writer_task(
        sink,
        frame_rx,
        settings.keepalive_interval,
        session.clone(),
        cancel.clone(),
    ));
    let mut reader = tokio::spawn(reader_task(stream, registry.clone(), session.clone()));

    let mut writer_join: Option<mpsc::Receiver<OutboundFrame>> = None;
    let mut reader_done = false;
    let mut commands_open = true;
    let mut drain_deadline: Option<Instant> = None;

    let outcome = loop {
        // Copied so the sleep future does not hold a borrow the command
        // handler needs for mutation.
        let deadline = drain_deadline;
        tokio::select! {
            _ = cancel.cancelled() => break SessionOutcome::Forced,

            cmd = command_rx.recv(), if commands_open => match cmd {
                Some(Command::Finish { done }) => {
                    if drain_deadline.is_none() {
                        log::info!("finalize requested, waiting for server close");
                        state_tx.send_replace(ConnectionState::Closing);
                        drain_deadline = Some(Instant::now() + settings.drain_timeout);
                    }
                    finish_acks.push(done);
                }
                None => commands_open = false,
            },

            result = &mut writer, if writer_join.is_none() => match result {
                Ok((rx, exit)) => {
                    writer_join = Some(rx);
                    match exit {
                        WriterExit::WriteError(e) => break SessionOutcome::Transport(e),
                        WriterExit::QueueClosed => {
                            log::info!("client handle dropped, closing connection");
                            break SessionOutcome::Forced;
                        }
                        // Only produced after teardown starts; nothing to do.
                        WriterExit::Cancelled => {}
                    }
                }
                Err(e) => break SessionOutcome::Transport(format!("writer task failed: {}", e)),
            },

            result = &mut reader, if !reader_done => {
                reader_done = true;
                let closing = drain_deadline.is_some();
                match result {
                    Ok(ReaderExit::PeerClose) | Ok(ReaderExit::StreamEnded) => {
                        if closing {
                            break SessionOutcome::Finished;
                        }
                        break SessionOutcome::Transport("connection closed by remote".to_string());
                    }
                    Ok(ReaderExit::ReadError(e)) => {
                        if closing {
                            log::debug!("read error during drain: {}", e);
                            break SessionOutcome::Finished;
                        }
                        break SessionOutcome::Transport(e);
                    }
                    Ok(ReaderExit::Cancelled) => {}
                    Err(e) => break SessionOutcome::Transport(format!("reader task failed: {}", e)),
                }
            },

            _ = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            }, if deadline.is_some() => {
                log::warn!("drain timeout elapsed before peer close, forcing teardown");
                break SessionOutcome::Finished;
            }
        }
    };

    session.cancel();
    let frame_rx = match writer_join {
        Some(rx) => Some(rx),
        None => match writer.await {
            Ok((rx, _)) => Some(rx),
            Err(e) => {
                log::warn!("writer task join failed: {}", e);
                None
            }
        },
    };
    if !reader_done {
        if let Err(e) = reader.await {
            log::warn!("reader task join failed: {}", e);
        }
    }

    (frame_rx, outcome)
}

/// Writer: sole owner of the socket sink.
///
/// Drains the outbound queue in strict FIFO order and injects a KeepAlive
/// control frame whenever the idle interval elapses with nothing sent.
/// Serializing keepalive through the same sink means it can never
/// interleave out of order with queued audio.
async fn writer_task(
    mut sink: SplitSink<WsStream, Message>,
    mut frame_rx: mpsc::Receiver<OutboundFrame>,
    keepalive_interval: Duration,
    session: CancellationToken,
    root: CancellationToken,
) -> (mpsc::Receiver<OutboundFrame>, WriterExit) {
    let mut keepalive = KeepaliveTimer::new(keepalive_interval);

    let exit = loop {
        tokio::select! {
            _ = session.cancelled() => break WriterExit::Cancelled,

            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    match &frame {
                        OutboundFrame::Control(control) => {
                            log::debug!("sending {:?} control frame", control);
                        }
                        OutboundFrame::Audio(chunk) => {
                            // Periodic progress logging, every 50 chunks.
                            if chunk.sequence % 50 == 0 {
                                log::debug!("sending audio chunk {}", chunk.sequence);
                            }
                        }
                    }
                    match write_frame(&mut sink, frame.into_message(), &session).await {
                        WriteOutcome::Ok => keepalive.rearm(),
                        WriteOutcome::Cancelled => break WriterExit::Cancelled,
                        WriteOutcome::Error(e) => break WriterExit::WriteError(e),
                    }
                }
                None => break WriterExit::QueueClosed,
            },

            _ = keepalive.expired(), if keepalive.enabled() => {
                log::debug!("idle interval elapsed, sending keepalive");
                let message = OutboundFrame::Control(ControlMessage::KeepAlive).into_message();
                match write_frame(&mut sink, message, &session).await {
                    WriteOutcome::Ok => keepalive.rearm(),
                    WriteOutcome::Cancelled => break WriterExit::Cancelled,
                    WriteOutcome::Error(e) => break WriterExit::WriteError(e),
                }
            }
        }
    };

    if !matches!(exit, WriterExit::WriteError(_)) {
        let teardown = async {
            if root.is_cancelled() {
                // Forced teardown: best-effort CloseStream before the
                // socket goes away.
                let message = OutboundFrame::Control(ControlMessage::CloseStream).into_message();
                let _ = sink.send(message).await;
            }
            let _ = sink.close().await;
        };
        // The socket may be wedged; teardown must not stall the supervisor.
        if timeout(Duration::from_secs(1), teardown).await.is_err() {
            log::debug!("socket teardown timed out, dropping");
        }
    }

    (frame_rx, exit)
}

enum WriteOutcome {
    Ok,
    Cancelled,
    Error(String),
}

/// One socket write, interruptible by session teardown.
///
/// `close()` must be able to interrupt an in-flight write on a
/// backpressured socket; abandoning the partial write is fine because the
/// socket is being torn down.
async fn write_frame(
    sink: &mut SplitSink<WsStream, Message>,
    message: Message,
    session: &CancellationToken,
) -> WriteOutcome {
    tokio::select! {
        _ = session.cancelled() => WriteOutcome::Cancelled,
        result = sink.send(message) => match result {
            Ok(()) => WriteOutcome::Ok,
            Err(e) => WriteOutcome::Error(e.to_string()),
        },
    }
}

/// Reader: sole owner of the socket stream.
///
/// Decodes each text frame and dispatches it before pulling the next one,
/// so listeners observe events in exact receipt order.
async fn reader_task(
    mut stream: SplitStream<WsStream>,
    registry: Arc<ListenerRegistry>,
    session: CancellationToken,
) -> ReaderExit {
    loop {
        tokio::select! {
            _ = session.cancelled() => return ReaderExit::Cancelled,

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    registry.dispatch(&decode_event(&text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    log::debug!("ignoring unexpected {}-byte inbound binary frame", bytes.len());
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => return ReaderExit::PeerClose,
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return ReaderExit::ReadError(e.to_string()),
                None => return ReaderExit::StreamEnded,
            }
        }
    }
}

/// Tracks the outbound idle deadline for keepalive injection.
///
/// Any outbound write rearms the deadline; when it expires the writer
/// emits one KeepAlive frame and rearms, so exactly one frame is produced
/// per idle interval elapsed.
struct KeepaliveTimer {
    interval: Duration,
    deadline: Instant,
}

impl KeepaliveTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    fn rearm(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await
    }
}

/// Opens the websocket with auth headers and encoding query parameters.
async fn open_socket(config: &ClientConfig, options: &LiveOptions) -> Result<WsStream, LiveError> {
    let url = format!(
        "{}{}",
        config.ws_endpoint("listen"),
        query_string(&options.query_pairs())
    );
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| LiveError::Handshake(e.to_string()))?;

    let auth = HeaderValue::from_str(&config.auth_header())
        .map_err(|e| LiveError::Handshake(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, auth);
    for (name, value) in config.extra_headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LiveError::Handshake(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| LiveError::Handshake(e.to_string()))?;
        request.headers_mut().insert(name, value);
    }

    log::info!("connecting to {}", config.ws_endpoint("listen"));
    let (socket, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| LiveError::Handshake("connection timeout".to_string()))?
        .map_err(|e| LiveError::Handshake(e.to_string()))?;

    Ok(socket)
}
