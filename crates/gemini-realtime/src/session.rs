use crate::types::{
    BidiGenerateContentRealtimeInput, BidiGenerateContentSetup, Blob, ClientMessage, Content,
    GenerationConfig, LiveServerContent, Part, PrebuiltVoiceConfig, ResponseModality,
    ServerMessage, SpeechConfig, VoiceConfig, sample_rate_from_mime,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use convobridge_core::{
    CloseReason, ConnectError, SessionConfig,
    audio::{AudioSink, MicFrames, Volume},
    audio_utils::{
        GEMINI_LIVE_INPUT_SAMPLE_RATE, GEMINI_LIVE_OUTPUT_SAMPLE_RATE, StreamResampler,
        decode_f32_from_base64_i16, encode_f32_to_base64_i16, f32_from_pcm16_bytes,
    },
    generic_types::{Speaker, TranscriptLine},
    transport::{OpenRequest, SessionEvents, SessionTransport, TransportSession},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self,
        protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const DEFAULT_VOICE: &str = "Puck";

type GeminiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for the Gemini Live API.
#[derive(Clone)]
pub struct GeminiLiveConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl GeminiLiveConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

impl std::fmt::Debug for GeminiLiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Opens realtime voice sessions against Gemini Live.
#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    config: GeminiLiveConfig,
}

impl GeminiLiveTransport {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeminiLiveConfig {
        &self.config
    }
}

#[async_trait]
impl SessionTransport for GeminiLiveTransport {
    type Session = GeminiSession;

    async fn open(&self, request: OpenRequest) -> Result<GeminiSession, ConnectError> {
        let OpenRequest {
            config,
            microphone,
            output,
            events,
        } = request;
        let session_id = events.session_id();

        let (ws_stream, _) = connect_async(self.config.url())
            .await
            .map_err(|e| ConnectError::new(describe_connect_error(&e)))?;
        info!(%session_id, model = %self.config.model, "Connected to Gemini Live WebSocket.");
        let (mut ws_sink, ws_stream) = ws_stream.split();

        let setup = ClientMessage::Setup(build_setup(&self.config.model, &config));
        let payload = serde_json::to_string(&setup)
            .map_err(|e| ConnectError::new(format!("Failed to encode session setup: {e}")))?;
        ws_sink
            .send(WsMessage::text(payload))
            .await
            .map_err(|e| ConnectError::new(format!("Failed to send session setup: {e}")))?;
        debug!(%session_id, "Sent Gemini setup message, waiting for setupComplete.");

        let shutdown = CancellationToken::new();
        let ready = Arc::new(AtomicBool::new(false));
        let pump = SessionPump {
            ws_sink,
            ws_stream,
            microphone,
            shutdown: shutdown.clone(),
            handler: ServerHandler {
                output: output.clone(),
                events,
                ready: ready.clone(),
            },
        };
        tokio::spawn(
            pump.run()
                .instrument(info_span!("gemini_session", session_id = %session_id)),
        );

        Ok(GeminiSession {
            shutdown,
            ready,
            output,
        })
    }
}

/// Handle to one Gemini Live connection. Dropping it closes the connection.
pub struct GeminiSession {
    shutdown: CancellationToken,
    ready: Arc<AtomicBool>,
    output: Arc<dyn AudioSink>,
}

impl GeminiSession {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl TransportSession for GeminiSession {
    fn set_output_volume(&self, volume: Volume) {
        if self.is_ready() {
            self.output.set_gain(volume);
        } else {
            debug!("Ignoring output volume change before the session is ready.");
        }
    }

    fn close(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!("Closing Gemini session on request.");
            self.shutdown.cancel();
        }
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn build_setup(model: &str, config: &SessionConfig) -> BidiGenerateContentSetup {
    let voice_name = config.voice_name().unwrap_or(DEFAULT_VOICE).to_string();
    BidiGenerateContentSetup {
        model: model.to_string(),
        generation_config: GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                },
            }),
        },
        system_instruction: config.instructions().map(|text| Content {
            parts: vec![Part { text }],
        }),
        input_audio_transcription: Default::default(),
        output_audio_transcription: Default::default(),
    }
}

fn describe_connect_error(err: &tungstenite::Error) -> String {
    match err {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            code @ (401 | 403) => format!("The voice service rejected the API key (HTTP {code})"),
            code => format!("The voice service refused the connection (HTTP {code})"),
        },
        other => format!("Could not reach the voice service: {other}"),
    }
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> CloseReason {
    match frame {
        None => CloseReason::Graceful,
        Some(frame) if frame.code == CloseCode::Normal => CloseReason::Graceful,
        Some(frame) => {
            let code = u16::from(frame.code);
            if frame.reason.is_empty() {
                CloseReason::Abnormal(format!(
                    "The voice service closed the connection (code {code})"
                ))
            } else {
                CloseReason::Abnormal(format!(
                    "The voice service closed the connection (code {code}): {}",
                    frame.reason
                ))
            }
        }
    }
}

/// Turns server messages into playback and session events.
struct ServerHandler {
    output: Arc<dyn AudioSink>,
    events: SessionEvents,
    ready: Arc<AtomicBool>,
}

impl ServerHandler {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn handle(&self, raw: &[u8]) {
        let message: ServerMessage = match serde_json::from_slice(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Failed to parse Gemini message: {e}. Raw: {}",
                    String::from_utf8_lossy(raw)
                );
                return;
            }
        };

        if message.setup_complete.is_some() && !self.ready.swap(true, Ordering::AcqRel) {
            info!("Gemini session setup is complete. Ready for bidirectional streaming.");
            self.events.ready();
        }
        if let Some(content) = message.server_content {
            self.handle_content(content);
        }
        if let Some(go_away) = message.go_away {
            warn!(time_left = ?go_away.time_left, "Gemini announced it will close the session.");
        }
    }

    fn handle_content(&self, content: LiveServerContent) {
        if content.interrupted == Some(true) {
            debug!("Agent turn interrupted by the caller, dropping queued playback.");
            self.output.clear();
        }
        if let Some(turn) = content.model_turn {
            for blob in turn.parts.into_iter().filter_map(|part| part.inline_data) {
                let sample_rate = blob
                    .mime_type
                    .as_deref()
                    .and_then(sample_rate_from_mime)
                    .unwrap_or(GEMINI_LIVE_OUTPUT_SAMPLE_RATE);
                let samples = decode_f32_from_base64_i16(&blob.data);
                if !samples.is_empty() {
                    self.output.play(&samples, sample_rate);
                }
            }
        }
        let transcriptions = [
            (Speaker::Caller, content.input_transcription),
            (Speaker::Agent, content.output_transcription),
        ];
        for (speaker, transcription) in transcriptions {
            if let Some(transcription) = transcription.filter(|t| !t.text.is_empty()) {
                self.events.transcript(TranscriptLine {
                    speaker,
                    text: transcription.text,
                });
            }
        }
        if content.turn_complete == Some(true) {
            debug!("Agent turn complete.");
        }
    }
}

/// Background task moving audio between the microphone, the socket and the
/// output sink for one session.
struct SessionPump {
    ws_sink: SplitSink<GeminiSocket, WsMessage>,
    ws_stream: SplitStream<GeminiSocket>,
    microphone: MicFrames,
    shutdown: CancellationToken,
    handler: ServerHandler,
}

impl SessionPump {
    async fn run(mut self) {
        let reason = match self.drive().await {
            Ok(reason) => reason,
            Err(e) => {
                error!("Gemini session failed: {e:#}");
                CloseReason::Abnormal(format!("{e:#}"))
            }
        };
        info!(?reason, "Gemini session ended.");
        self.handler.events.closed(reason);
    }

    async fn drive(&mut self) -> Result<CloseReason> {
        let Self {
            ws_sink,
            ws_stream,
            microphone,
            shutdown,
            handler,
        } = self;
        let mut resampler =
            StreamResampler::new(microphone.sample_rate, GEMINI_LIVE_INPUT_SAMPLE_RATE)
                .context("Failed to set up microphone resampling")?;
        let mime_type = format!("audio/pcm;rate={GEMINI_LIVE_INPUT_SAMPLE_RATE}");
        let mut mic_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "call ended".into(),
                    };
                    if let Err(e) = ws_sink.send(WsMessage::Close(Some(frame))).await {
                        debug!("Close frame was not delivered: {e}");
                    }
                    return Ok(CloseReason::Graceful);
                }
                frame = microphone.rx.recv(), if mic_open => {
                    let Some(frame) = frame else {
                        mic_open = false;
                        warn!("Microphone stream ended, continuing without upstream audio.");
                        continue;
                    };
                    if !handler.is_ready() {
                        trace!("Dropping microphone frame received before setup completed.");
                        continue;
                    }
                    let samples = resampler.process(&f32_from_pcm16_bytes(&frame));
                    if samples.is_empty() {
                        continue;
                    }
                    let input = ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
                        audio: Blob {
                            mime_type: mime_type.clone(),
                            data: encode_f32_to_base64_i16(&samples),
                        },
                    });
                    let payload = serde_json::to_string(&input)?;
                    ws_sink
                        .send(WsMessage::text(payload))
                        .await
                        .context("Failed to send microphone audio to Gemini")?;
                }
                msg = ws_stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => handler.handle(text.as_bytes()),
                        Some(Ok(WsMessage::Binary(data))) => handler.handle(&data),
                        Some(Ok(WsMessage::Close(frame))) => {
                            debug!(?frame, "Gemini WebSocket connection closed by server.");
                            return Ok(close_reason(frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("Error reading from Gemini WebSocket: {}", e);
                            return Ok(CloseReason::Abnormal(format!(
                                "Connection to the voice service failed: {e}"
                            )));
                        }
                        None => {
                            return Ok(CloseReason::Abnormal(
                                "Connection to the voice service was lost".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}
