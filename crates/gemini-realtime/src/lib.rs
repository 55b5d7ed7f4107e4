//! Gemini Live realtime voice transport.

mod session;
pub mod types;

pub use session::{
    DEFAULT_MODEL, DEFAULT_VOICE, GEMINI_LIVE_ENDPOINT, GeminiLiveConfig, GeminiLiveTransport,
    GeminiSession,
};
