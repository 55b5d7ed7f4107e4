//! The contract between the call manager and a realtime voice transport.
//!
//! A transport turns an [`OpenRequest`] into a live [`TransportSession`] and
//! reports what happens to it afterwards through [`SessionEvents`]. Events are
//! not delivered by callbacks into the manager: they are queued on a channel
//! and tagged with the [`SessionId`] of the attempt that produced them, so the
//! manager can drop anything that belongs to a superseded session.

use crate::{
    audio::{AudioSink, MicFrames, Volume},
    error::{ConnectError, LiveCallError},
    generic_types::{CloseReason, SessionConfig, TranscriptLine},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Identity of one connection attempt. Strictly increasing per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn first() -> Self {
        SessionId(1)
    }

    pub(crate) fn next(self) -> Self {
        SessionId(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a transport needs to open one session.
pub struct OpenRequest {
    pub config: SessionConfig,
    /// Microphone frames to stream upstream once the session is ready.
    pub microphone: MicFrames,
    /// Where decoded remote audio goes.
    pub output: Arc<dyn AudioSink>,
    pub events: SessionEvents,
}

/// A realtime voice backend.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    type Session: TransportSession;

    /// Starts negotiation and returns the session handle.
    ///
    /// Returning does not mean audio is flowing: the transport signals that
    /// with [`SessionEvents::ready`]. Dropping the returned future abandons
    /// the attempt without side effects.
    async fn open(&self, request: OpenRequest) -> Result<Self::Session, ConnectError>;
}

/// One open transport connection.
pub trait TransportSession: Send + 'static {
    /// Applies the output gain. Ignored until the session is ready.
    fn set_output_volume(&self, volume: Volume);

    /// Tears the connection down. Safe to call repeatedly and before ready.
    fn close(&mut self);
}

/// What happened, as seen by the call manager's inbound queue.
#[derive(Debug)]
pub(crate) enum Signal {
    /// The negotiation task stored an opened session for pickup.
    Opened,
    /// Microphone acquisition or `open` failed.
    Failed(LiveCallError),
    /// The connect deadline passed before the session became ready.
    TimedOut,
    Ready,
    Closed(CloseReason),
    Transcript(TranscriptLine),
}

#[derive(Debug)]
pub(crate) struct Inbound {
    pub id: SessionId,
    pub signal: Signal,
}

struct Emitter {
    id: SessionId,
    tx: mpsc::UnboundedSender<Inbound>,
    ready_fired: AtomicBool,
    closed_fired: AtomicBool,
}

/// Event emitter handed to a transport for one session.
///
/// `ready` and `closed` are delivered at most once each; repeated calls are
/// ignored. Cloning shares the same once-guards.
#[derive(Clone)]
pub struct SessionEvents {
    inner: Arc<Emitter>,
}

impl SessionEvents {
    pub(crate) fn new(id: SessionId, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            inner: Arc::new(Emitter {
                id,
                tx,
                ready_fired: AtomicBool::new(false),
                closed_fired: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.id
    }

    /// Bidirectional audio is live.
    pub fn ready(&self) {
        if !self.inner.ready_fired.swap(true, Ordering::SeqCst) {
            self.signal(Signal::Ready);
        }
    }

    /// The session ended.
    pub fn closed(&self, reason: CloseReason) {
        if !self.inner.closed_fired.swap(true, Ordering::SeqCst) {
            self.signal(Signal::Closed(reason));
        }
    }

    pub fn transcript(&self, line: TranscriptLine) {
        self.signal(Signal::Transcript(line));
    }

    pub(crate) fn signal(&self, signal: Signal) {
        // The receiver only goes away with the manager, at which point nobody
        // is listening for this session anymore.
        let _ = self.inner.tx.send(Inbound {
            id: self.inner.id,
            signal,
        });
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("session_id", &self.inner.id)
            .finish()
    }
}
