//! Drives `LiveCall` over the Gemini transport against a local WebSocket
//! server that speaks just enough of the Live protocol.

use async_trait::async_trait;
use bytes::Bytes;
use convobridge_core::{
    AcquisitionError, ConnectionState, LiveCall, LiveCallError, LiveCallSettings, SessionConfig,
    audio::{AudioCapture, AudioSink, Microphone, Volume},
    audio_utils::encode_f32_to_base64_i16,
};
use futures_util::{SinkExt, StreamExt};
use gemini_realtime::{GeminiLiveConfig, GeminiLiveTransport};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};

/// 16 kHz microphone that emits 20 ms of silence every 10 ms until released.
#[derive(Default)]
struct ToneCapture {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl AudioCapture for ToneCapture {
    async fn acquire(&self) -> Result<Microphone, AcquisitionError> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                if tx.send(Bytes::from(vec![0u8; 640])).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        let released = self.released.clone();
        Ok(Microphone::new(16_000, rx, move || {
            released.store(true, Ordering::SeqCst);
        }))
    }
}

#[derive(Default)]
struct RecordingSink {
    played: Mutex<Vec<(usize, u32)>>,
    gain: Mutex<Option<f32>>,
}

impl AudioSink for RecordingSink {
    fn play(&self, samples: &[f32], sample_rate: u32) {
        self.played.lock().unwrap().push((samples.len(), sample_rate));
    }

    fn set_gain(&self, gain: Volume) {
        *self.gain.lock().unwrap() = Some(gain.get());
    }

    fn level(&self) -> f32 {
        0.0
    }

    fn clear(&self) {}
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    while let Some(msg) = ws.next().await {
        match msg.unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Binary(data) => return serde_json::from_slice(&data).unwrap(),
            _ => {}
        }
    }
    panic!("client went away");
}

async fn complete_setup(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    let setup = next_json(&mut ws).await;
    assert_eq!(setup["setup"]["model"], "models/loopback");
    ws.send(Message::text(json!({"setupComplete": {}}).to_string()))
        .await
        .unwrap();
    ws
}

struct Harness {
    call: LiveCall<GeminiLiveTransport>,
    capture_released: Arc<AtomicBool>,
    sink: Arc<RecordingSink>,
}

fn harness(endpoint: String) -> Harness {
    let mut config = GeminiLiveConfig::new("test-key");
    config.model = "models/loopback".into();
    config.endpoint = endpoint;
    let capture = ToneCapture::default();
    let capture_released = capture.released.clone();
    let sink = Arc::new(RecordingSink::default());
    let call = LiveCall::new(
        Arc::new(GeminiLiveTransport::new(config)),
        Arc::new(capture),
        sink.clone(),
        LiveCallSettings {
            connect_timeout: Duration::from_secs(5),
        },
    );
    Harness {
        call,
        capture_released,
        sink,
    }
}

async fn wait_for(call: &mut LiveCall<GeminiLiveTransport>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while call.state() != state {
            call.next_event().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {state}, stuck in {}", call.state()));
}

fn agent() -> SessionConfig {
    SessionConfig {
        agent_name: Some("Emma".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_call_streams_audio_and_ends_on_server_goodbye() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut ws = complete_setup(&listener).await;
        go_rx.await.unwrap();

        let input = next_json(&mut ws).await;
        assert_eq!(
            input["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );

        let reply = json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {
                    "mimeType": "audio/pcm;rate=24000",
                    "data": encode_f32_to_base64_i16(&[0.25; 240]),
                }}]},
                "outputTranscription": {"text": "Hello there"},
                "turnComplete": true
            }
        });
        ws.send(Message::text(reply.to_string())).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut h = harness(endpoint);
    h.call.set_volume(0.4);
    h.call.connect(agent());
    assert_eq!(h.call.state(), ConnectionState::Connecting);

    wait_for(&mut h.call, ConnectionState::Connected).await;
    assert_eq!(*h.sink.gain.lock().unwrap(), Some(0.4));
    go_tx.send(()).unwrap();

    wait_for(&mut h.call, ConnectionState::Idle).await;
    assert!(h.call.error().is_none());
    assert!(h.capture_released.load(Ordering::SeqCst));
    assert_eq!(*h.sink.played.lock().unwrap(), vec![(240, 24_000)]);

    let summary = h.call.take_last_call().unwrap();
    assert_eq!(summary.transcript(), "Emma: Hello there");
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_close_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let mut ws = complete_setup(&listener).await;
        go_rx.await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "Internal error".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut h = harness(endpoint);
    h.call.connect(agent());
    wait_for(&mut h.call, ConnectionState::Connected).await;
    go_tx.send(()).unwrap();
    wait_for(&mut h.call, ConnectionState::Error).await;

    match h.call.error() {
        Some(LiveCallError::AbnormalClosure(message)) => assert!(message.contains("1011")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.capture_released.load(Ordering::SeqCst));
    server.await.unwrap();
}

#[tokio::test]
async fn test_hang_up_sends_normal_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (code_tx, code_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut ws = complete_setup(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let _ = code_tx.send(frame.map(|f| f.code));
                break;
            }
        }
    });

    let mut h = harness(endpoint);
    h.call.connect(agent());
    wait_for(&mut h.call, ConnectionState::Connected).await;

    h.call.disconnect();
    assert_eq!(h.call.state(), ConnectionState::Idle);
    assert!(h.capture_released.load(Ordering::SeqCst));

    let code = tokio::time::timeout(Duration::from_secs(5), code_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(CloseCode::Normal));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_service_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let mut h = harness(endpoint);
    h.call.connect(SessionConfig::default());
    wait_for(&mut h.call, ConnectionState::Error).await;

    assert!(matches!(h.call.error(), Some(LiveCallError::Connect(_))));
    assert!(h.capture_released.load(Ordering::SeqCst));
}
