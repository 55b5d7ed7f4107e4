//! ConvoBridge live-call core.
//!
//! The [`live_call::LiveCall`] manager owns one realtime voice session at a
//! time and reports it to the UI as a small state machine. Voice backends plug
//! in through [`transport::SessionTransport`]; microphones and speakers through
//! the traits in [`audio`].

pub mod audio;
pub mod audio_utils;
pub mod call_log;
pub mod error;
pub mod generic_types;
pub mod live_call;
pub mod transport;

pub use error::{AcquisitionError, ConnectError, LiveCallError};
pub use generic_types::{CallOutcome, CallSummary, CloseReason, ConnectionState, SessionConfig};
pub use live_call::{CallSnapshot, LiveCall, LiveCallSettings};
