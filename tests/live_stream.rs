//! End-to-end tests for the live streaming client.
//!
//! Every test drives the real client against an in-process websocket
//! server on a loopback port, so the whole suite runs offline with no
//! credentials.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test live_stream
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use voxline::live::{
    ConnectionState, EventCategory, LiveClient, LiveError, LiveEvent, LiveOptions,
    ReconnectPolicy, StreamSettings,
};
use voxline::{ClientConfig, VoxlineClient};

type ServerSocket = WebSocketStream<TcpStream>;

const RESULT_FRAME: &str = r#"{
    "type": "Results",
    "channel": {
        "alternatives": [{"transcript": "hello", "confidence": 0.9, "words": []}]
    },
    "is_final": false,
    "speech_final": false,
    "start": 0.0,
    "duration": 0.4
}"#;

async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("ws://{}", addr))
}

async fn accept_one(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("websocket handshake")
}

fn fast_settings() -> StreamSettings {
    StreamSettings {
        // Out of the way unless a test is about keepalive.
        keepalive_interval: Duration::from_secs(30),
        reconnect: ReconnectPolicy {
            enabled: false,
            ..Default::default()
        },
        queue_capacity: 64,
        backpressure_wait: Duration::from_millis(200),
        drain_timeout: Duration::from_secs(2),
    }
}

fn client_with(ws_url: String, settings: StreamSettings) -> LiveClient {
    let config = ClientConfig::new("test-key").with_ws_url(ws_url);
    VoxlineClient::new(config).live_with_settings(LiveOptions::default(), settings)
}

/// Registers a listener that forwards every event of a category to a channel.
fn collect(live: &LiveClient, category: EventCategory) -> mpsc::UnboundedReceiver<LiveEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    live.on(category, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_state(live: &LiveClient, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while live.state() != Some(state) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for state {:?}, currently {:?}",
            state,
            live.state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn start_connects_and_emits_open() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while let Some(Ok(message)) = socket.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let live = client_with(url, fast_settings());
    let mut opens = collect(&live, EventCategory::Open);

    live.start().await.expect("start should succeed");
    assert!(live.is_connected());
    assert!(matches!(recv_event(&mut opens).await, LiveEvent::Open));

    live.close().await;
    assert!(!live.is_connected());
    assert_eq!(live.state(), Some(ConnectionState::Closed));
    server.await.unwrap();
}

#[tokio::test]
async fn failed_handshake_is_fatal_and_not_retried() {
    // Bind then drop, so the port refuses connections.
    let (listener, url) = bind_server().await;
    drop(listener);

    let live = client_with(url, fast_settings());
    let result = live.start().await;
    assert!(
        matches!(result, Err(LiveError::Handshake(_))),
        "expected handshake error, got {:?}",
        result.err()
    );

    assert_eq!(live.state(), Some(ConnectionState::Closed));
    assert!(matches!(
        live.send(vec![1]).await,
        Err(LiveError::NotConnected)
    ));
}

#[tokio::test]
async fn send_before_start_is_a_state_error() {
    let live = client_with("ws://127.0.0.1:1".to_string(), fast_settings());
    assert!(matches!(
        live.send(vec![1, 2, 3]).await,
        Err(LiveError::NotConnected)
    ));
}

#[tokio::test]
async fn close_twice_is_a_noop() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while socket.next().await.is_some() {}
    });

    let live = client_with(url, fast_settings());
    let mut closes = collect(&live, EventCategory::Close);

    live.start().await.expect("start");
    live.close().await;
    live.close().await;

    assert!(matches!(recv_event(&mut closes).await, LiveEvent::Close));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        closes.try_recv().is_err(),
        "second close must not emit another Close event"
    );
    assert_eq!(live.state(), Some(ConnectionState::Closed));
    server.abort();
}

// ============================================================================
// Outbound ordering and draining
// ============================================================================

#[tokio::test]
async fn queued_audio_flushes_in_order_before_finalize() {
    let (listener, url) = bind_server().await;

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while let Some(Ok(message)) = socket.next().await {
            match message {
                Message::Binary(bytes) => {
                    frames_tx.send(bytes).expect("record frame");
                }
                Message::Text(text) => {
                    if text.contains("Finalize") {
                        let metadata = r#"{"type":"Metadata","request_id":"req_1","duration":0.5,"channels":1}"#;
                        socket
                            .send(Message::Text(metadata.to_string()))
                            .await
                            .expect("send metadata");
                        socket.close(None).await.expect("close");
                        while socket.next().await.is_some() {}
                        return;
                    }
                }
                _ => {}
            }
        }
    });

    let live = client_with(url, fast_settings());
    let mut metadata_events = collect(&live, EventCategory::Metadata);

    live.start().await.expect("start");

    let chunks: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; 8 + i as usize]).collect();
    for chunk in &chunks {
        live.send(chunk.clone()).await.expect("send");
    }
    live.finish().await.expect("finish");

    // Every chunk arrived, byte-exact, in call order, before the close.
    let mut received = Vec::new();
    while let Ok(bytes) = frames_rx.try_recv() {
        received.push(bytes);
    }
    assert_eq!(received, chunks);

    // The final metadata sent during the drain window was dispatched.
    assert!(matches!(
        recv_event(&mut metadata_events).await,
        LiveEvent::Metadata(_)
    ));

    assert_eq!(live.state(), Some(ConnectionState::Closed));
    server.await.unwrap();
}

#[tokio::test]
async fn finish_times_out_when_peer_never_closes() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        // Read everything but never close: force the drain timeout.
        while socket.next().await.is_some() {}
    });

    let settings = StreamSettings {
        drain_timeout: Duration::from_millis(300),
        ..fast_settings()
    };
    let live = client_with(url, settings);
    live.start().await.expect("start");
    live.send(vec![1, 2]).await.expect("send");

    let started = tokio::time::Instant::now();
    live.finish().await.expect("finish");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(live.state(), Some(ConnectionState::Closed));
    server.abort();
}

#[tokio::test]
async fn send_during_drain_window_is_a_state_error() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while socket.next().await.is_some() {}
    });

    let settings = StreamSettings {
        drain_timeout: Duration::from_millis(500),
        ..fast_settings()
    };
    let live = Arc::new(client_with(url, settings));
    live.start().await.expect("start");

    let finisher = {
        let live = live.clone();
        tokio::spawn(async move { live.finish().await })
    };

    wait_for_state(&live, ConnectionState::Closing).await;
    assert!(matches!(
        live.send(vec![7]).await,
        Err(LiveError::NotConnected)
    ));

    finisher.await.unwrap().expect("finish");
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_queue_surfaces_backpressure_error() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let socket = accept_one(&listener).await;
        // Never read: let the transport back up.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let settings = StreamSettings {
        queue_capacity: 1,
        backpressure_wait: Duration::from_millis(100),
        keepalive_interval: Duration::ZERO,
        ..fast_settings()
    };
    let live = client_with(url, settings);
    live.start().await.expect("start");

    // Chunks larger than any sane socket buffer; the writer blocks, the
    // queue fills, and send must fail loudly rather than drop audio.
    let chunk = vec![0u8; 1 << 22];
    let mut saw_backpressure = false;
    for _ in 0..64 {
        match live.send(chunk.clone()).await {
            Ok(()) => {}
            Err(LiveError::Backpressure) => {
                saw_backpressure = true;
                break;
            }
            Err(other) => panic!("unexpected send error: {}", other),
        }
    }
    assert!(saw_backpressure, "send never reported backpressure");

    live.close().await;
    server.abort();
}

// ============================================================================
// Inbound dispatch
// ============================================================================

#[tokio::test]
async fn result_events_route_to_result_listeners_only() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while let Some(Ok(message)) = socket.next().await {
            match message {
                Message::Binary(_) => {
                    socket
                        .send(Message::Text(RESULT_FRAME.to_string()))
                        .await
                        .expect("send result");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let live = client_with(url, fast_settings());
    let mut results = collect(&live, EventCategory::Result);
    let mut errors = collect(&live, EventCategory::Error);

    live.start().await.expect("start");
    live.send(vec![0x01, 0x02]).await.expect("send");

    match recv_event(&mut results).await {
        LiveEvent::Result(result) => {
            assert!(!result.is_final);
            assert_eq!(result.channel.alternatives[0].transcript, "hello");
        }
        other => panic!("expected Result event, got {:?}", other),
    }
    assert!(
        errors.try_recv().is_err(),
        "error listeners must not receive result events"
    );

    live.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn events_dispatch_in_receipt_order_despite_panicking_listener() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        for frame in [
            r#"{"type":"SpeechStarted","timestamp":0.1}"#,
            RESULT_FRAME,
            r#"{"type":"UtteranceEnd","last_word_end":0.5}"#,
        ] {
            socket
                .send(Message::Text(frame.to_string()))
                .await
                .expect("send frame");
        }
        while socket.next().await.is_some() {}
    });

    let live = client_with(url, fast_settings());
    // Registered first, so the collector below proves isolation.
    live.on(EventCategory::All, |_| panic!("listener bug"));
    let mut all_events = collect(&live, EventCategory::All);

    live.start().await.expect("start");

    let mut categories = Vec::new();
    for _ in 0..4 {
        categories.push(recv_event(&mut all_events).await.category());
    }
    assert_eq!(
        categories,
        vec![
            EventCategory::Open,
            EventCategory::SpeechStarted,
            EventCategory::Result,
            EventCategory::UtteranceEnd,
        ]
    );

    live.close().await;
    server.abort();
}

#[tokio::test]
async fn malformed_and_unknown_frames_do_not_kill_the_connection() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        for frame in [
            "not json at all",
            r#"{"type":"BrandNewEventKind","payload":42}"#,
            RESULT_FRAME,
        ] {
            socket
                .send(Message::Text(frame.to_string()))
                .await
                .expect("send frame");
        }
        while socket.next().await.is_some() {}
    });

    let live = client_with(url, fast_settings());
    let mut errors = collect(&live, EventCategory::Error);
    let mut unhandled = collect(&live, EventCategory::Unhandled);
    let mut results = collect(&live, EventCategory::Result);

    live.start().await.expect("start");

    match recv_event(&mut errors).await {
        LiveEvent::Error(err) => assert_eq!(err.code, "DECODE_ERROR"),
        other => panic!("expected Error event, got {:?}", other),
    }
    match recv_event(&mut unhandled).await {
        LiveEvent::Unhandled { event_type, .. } => assert_eq!(event_type, "BrandNewEventKind"),
        other => panic!("expected Unhandled event, got {:?}", other),
    }
    // The connection survived both bad frames.
    assert!(matches!(
        recv_event(&mut results).await,
        LiveEvent::Result(_)
    ));
    assert!(live.is_connected());

    live.close().await;
    server.abort();
}

// ============================================================================
// Keepalive
// ============================================================================

#[tokio::test]
async fn keepalive_emitted_per_idle_interval() {
    let (listener, url) = bind_server().await;
    let (text_tx, mut text_rx) = mpsc::unbounded_channel::<String>();
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let _ = text_tx.send(text);
            }
        }
    });

    let settings = StreamSettings {
        keepalive_interval: Duration::from_millis(100),
        ..fast_settings()
    };
    let live = client_with(url, settings);
    live.start().await.expect("start");

    // No audio for several intervals.
    tokio::time::sleep(Duration::from_millis(350)).await;
    live.close().await;
    server.abort();

    let mut keepalives = 0;
    while let Ok(text) = text_rx.try_recv() {
        if text == r#"{"type":"KeepAlive"}"# {
            keepalives += 1;
        }
    }
    assert!(
        (2..=5).contains(&keepalives),
        "expected one keepalive per idle interval, got {}",
        keepalives
    );
}

// ============================================================================
// Disconnects and reconnection
// ============================================================================

#[tokio::test]
async fn unexpected_close_emits_single_disconnect_and_fails_later_sends() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(&listener).await;
        socket.close(None).await.expect("close");
        while socket.next().await.is_some() {}
    });

    let live = client_with(url, fast_settings());
    let mut closes = collect(&live, EventCategory::Close);

    live.start().await.expect("start");
    assert!(matches!(recv_event(&mut closes).await, LiveEvent::Close));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        closes.try_recv().is_err(),
        "disconnect must be notified exactly once"
    );
    assert_eq!(live.state(), Some(ConnectionState::Closed));
    assert!(matches!(
        live.send(vec![1]).await,
        Err(LiveError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_transport_loss() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        // First session dies abruptly right after the handshake.
        let first = accept_one(&listener).await;
        drop(first);

        // Second session proves the client came back: return its first
        // audio frame.
        let mut second = accept_one(&listener).await;
        loop {
            match second.next().await {
                Some(Ok(Message::Binary(bytes))) => return bytes,
                Some(Ok(_)) => {}
                _ => panic!("second session ended before audio arrived"),
            }
        }
    });

    let settings = StreamSettings {
        reconnect: ReconnectPolicy {
            enabled: true,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        },
        ..fast_settings()
    };
    let live = client_with(url, settings);
    let mut opens = collect(&live, EventCategory::Open);

    live.start().await.expect("start");
    assert!(matches!(recv_event(&mut opens).await, LiveEvent::Open));
    // Second Open marks the re-established session.
    assert!(matches!(recv_event(&mut opens).await, LiveEvent::Open));

    live.send(vec![9, 9, 9]).await.expect("send after reconnect");
    assert_eq!(server.await.unwrap(), vec![9, 9, 9]);

    live.close().await;
}

#[tokio::test]
async fn reconnect_exhaustion_reports_terminal_close() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        // One successful session, then the port goes dead.
        let first = accept_one(&listener).await;
        drop(first);
        drop(listener);
    });

    let settings = StreamSettings {
        reconnect: ReconnectPolicy {
            enabled: true,
            max_attempts: 2,
            initial_backoff: Duration::from_millis(30),
            max_backoff: Duration::from_millis(60),
        },
        ..fast_settings()
    };
    let live = client_with(url, settings);
    let mut closes = collect(&live, EventCategory::Close);

    live.start().await.expect("start");
    server.await.unwrap();

    assert!(matches!(recv_event(&mut closes).await, LiveEvent::Close));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        closes.try_recv().is_err(),
        "exhaustion must be reported as exactly one terminal disconnect"
    );
    assert_eq!(live.state(), Some(ConnectionState::Closed));
}
