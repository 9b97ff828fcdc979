//! Public facade for live streaming transcription.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;

use super::connection::{spawn_connection, Command, ConnectionHandle, ConnectionState};
use super::dispatcher::{ListenerId, ListenerRegistry};
use super::options::{LiveOptions, StreamSettings};
use super::protocol::{AudioChunk, ControlMessage, EventCategory, LiveEvent, OutboundFrame};
use super::LiveError;
use crate::config::ClientConfig;

/// Streaming transcription client.
///
/// One `LiveClient` manages at most one live connection at a time. After a
/// connection reaches its terminal state, `start` may be called again; a
/// fresh connection instance is constructed underneath the same facade.
///
/// Listener registration is independent of connection lifecycle: handlers
/// registered before `start` receive the `Open` event of the first
/// connection.
pub struct LiveClient {
    config: ClientConfig,
    options: LiveOptions,
    settings: StreamSettings,
    registry: Arc<ListenerRegistry>,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl LiveClient {
    /// Creates a client with default transport settings.
    pub fn new(config: ClientConfig, options: LiveOptions) -> Self {
        Self::with_settings(config, options, StreamSettings::default())
    }

    /// Creates a client with explicit transport settings.
    pub fn with_settings(
        config: ClientConfig,
        options: LiveOptions,
        settings: StreamSettings,
    ) -> Self {
        Self {
            config,
            options,
            settings,
            registry: Arc::new(ListenerRegistry::new()),
            connection: Mutex::new(None),
        }
    }

    /// Opens the connection.
    ///
    /// Resolves once the handshake has completed. A rejected handshake
    /// (bad credential, unreachable endpoint) is fatal and is not retried;
    /// only connections lost after being established fall under the
    /// reconnect policy.
    pub async fn start(&self) -> Result<(), LiveError> {
        if !self.config.has_api_key() {
            return Err(LiveError::MissingApiKey);
        }

        let ready_rx = {
            let mut connection = self.lock_connection();
            if let Some(handle) = connection.as_ref() {
                if *handle.state_rx.borrow() != ConnectionState::Closed {
                    return Err(LiveError::AlreadyStarted);
                }
            }
            let (handle, ready_rx) = spawn_connection(
                self.config.clone(),
                self.options.clone(),
                self.settings.clone(),
                self.registry.clone(),
            );
            *connection = Some(handle);
            ready_rx
        };

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(LiveError::Handshake(
                "connection task stopped before startup completed".to_string(),
            )),
        }
    }

    /// Enqueues one audio chunk for transmission.
    ///
    /// Chunks are delivered to the transport in exact call order, never
    /// merged or split. While the queue is full the call waits up to the
    /// configured backpressure bound, then fails with
    /// [`LiveError::Backpressure`]; audio is never silently dropped.
    pub async fn send(&self, audio: impl Into<Vec<u8>>) -> Result<(), LiveError> {
        let handle = self.connected_handle()?;
        let chunk = AudioChunk {
            bytes: audio.into(),
            sequence: handle.next_sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.enqueue_on(&handle, OutboundFrame::Audio(chunk)).await
    }

    /// Enqueues an explicit KeepAlive control frame.
    pub async fn keep_alive(&self) -> Result<(), LiveError> {
        let handle = self.connected_handle()?;
        self.enqueue_on(&handle, OutboundFrame::Control(ControlMessage::KeepAlive))
            .await
    }

    /// Registers a listener for an event category.
    ///
    /// Safe to call at any time, including from inside a dispatched
    /// callback. Returns a handle for [`off`](Self::off).
    pub fn on<F>(&self, category: EventCategory, handler: F) -> ListenerId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.registry.on(category, handler)
    }

    /// Removes a listener registration; returns whether it was present.
    pub fn off(&self, category: EventCategory, id: ListenerId) -> bool {
        self.registry.off(category, id)
    }

    /// Graceful half-close.
    ///
    /// Flushes all queued audio, sends a Finalize control frame, then keeps
    /// the connection up until the server closes its side or the drain
    /// timeout elapses. Further `send` calls are rejected.
    pub async fn finish(&self) -> Result<(), LiveError> {
        let handle = self.connected_handle()?;
        if handle.finishing.swap(true, Ordering::SeqCst) {
            return Err(LiveError::NotConnected);
        }

        // The Finalize frame goes through the same FIFO queue as audio, so
        // everything enqueued before this call flushes ahead of it.
        handle
            .frame_tx
            .send(OutboundFrame::Control(ControlMessage::Finalize))
            .await
            .map_err(|_| LiveError::SendQueueClosed)?;

        let (done_tx, done_rx) = oneshot::channel();
        handle
            .command_tx
            .send(Command::Finish { done: done_tx })
            .map_err(|_| LiveError::SendQueueClosed)?;

        // Resolves when the connection reaches Closed; a dropped sender
        // means the connection is already gone, which is the same outcome.
        let _ = done_rx.await;
        Ok(())
    }

    /// Forced teardown.
    ///
    /// Cancels the reader and writer immediately, discards queued frames,
    /// and sends a best-effort CloseStream frame. Calling it again (or
    /// before `start`) is a no-op.
    pub async fn close(&self) {
        let handle = {
            let connection = self.lock_connection();
            connection.as_ref().map(|handle| {
                (handle.cancel.clone(), handle.state_rx.clone())
            })
        };

        let (cancel, mut state_rx) = match handle {
            Some(parts) => parts,
            None => return,
        };

        cancel.cancel();
        while *state_rx.borrow() != ConnectionState::Closed {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Point-in-time connection state query.
    pub fn is_connected(&self) -> bool {
        self.state() == Some(ConnectionState::Connected)
    }

    /// Current lifecycle state, if a connection has been started.
    pub fn state(&self) -> Option<ConnectionState> {
        let connection = self.lock_connection();
        connection.as_ref().map(|handle| *handle.state_rx.borrow())
    }

    async fn enqueue_on(
        &self,
        handle: &HandleSnapshot,
        frame: OutboundFrame,
    ) -> Result<(), LiveError> {
        match handle
            .frame_tx
            .send_timeout(frame, self.settings.backpressure_wait)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(LiveError::Backpressure),
            Err(SendTimeoutError::Closed(_)) => Err(LiveError::SendQueueClosed),
        }
    }

    /// Snapshot of the handle, gated on the Connected state.
    fn connected_handle(&self) -> Result<HandleSnapshot, LiveError> {
        let connection = self.lock_connection();
        let handle = connection.as_ref().ok_or(LiveError::NotConnected)?;
        if *handle.state_rx.borrow() != ConnectionState::Connected {
            return Err(LiveError::NotConnected);
        }
        Ok(HandleSnapshot {
            frame_tx: handle.frame_tx.clone(),
            command_tx: handle.command_tx.clone(),
            finishing: handle.finishing.clone(),
            next_sequence: handle.next_sequence.clone(),
        })
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Option<ConnectionHandle>> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct HandleSnapshot {
    frame_tx: tokio::sync::mpsc::Sender<OutboundFrame>,
    command_tx: tokio::sync::mpsc::UnboundedSender<Command>,
    finishing: Arc<std::sync::atomic::AtomicBool>,
    next_sequence: Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LiveClient {
        LiveClient::new(ClientConfig::new("test-key"), LiveOptions::default())
    }

    #[tokio::test]
    async fn test_send_before_start_is_a_state_error() {
        let live = client();
        let result = live.send(vec![0u8; 4]).await;
        assert!(matches!(result, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_finish_before_start_is_a_state_error() {
        let live = client();
        assert!(matches!(live.finish().await, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_before_start_is_a_noop() {
        let live = client();
        live.close().await;
        assert!(!live.is_connected());
        assert_eq!(live.state(), None);
    }

    #[tokio::test]
    async fn test_start_without_api_key_is_a_config_error() {
        let live = LiveClient::new(ClientConfig::new(""), LiveOptions::default());
        assert!(matches!(live.start().await, Err(LiveError::MissingApiKey)));
    }

    #[test]
    fn test_listener_registration_works_before_start() {
        let live = client();
        let id = live.on(EventCategory::Result, |_| {});
        assert!(live.off(EventCategory::Result, id));
        assert!(!live.off(EventCategory::Result, id));
    }
}
