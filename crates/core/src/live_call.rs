//! The live-call connection manager.
//!
//! [`LiveCall`] owns at most one voice session at a time and exposes it to the
//! UI as `idle -> connecting -> connected -> error`. Setup runs in a spawned
//! negotiation task; everything the task and the transport observe comes back
//! as [`Inbound`] messages on a single queue, tagged with the [`SessionId`] of
//! the attempt. The manager applies them in order when the consumer calls
//! [`LiveCall::next_event`] or [`LiveCall::poll_events`], and drops any message
//! whose id is no longer current.

use crate::{
    audio::{AudioCapture, AudioSink, Microphone, Volume},
    error::{AcquisitionError, LiveCallError},
    generic_types::{
        CallOutcome, CallSummary, CloseReason, ConnectionState, SessionConfig, TranscriptLine,
    },
    transport::{
        Inbound, OpenRequest, SessionEvents, SessionId, SessionTransport, Signal, TransportSession,
    },
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables of the call manager.
#[derive(Debug, Clone)]
pub struct LiveCallSettings {
    /// Upper bound on the `connecting` phase.
    pub connect_timeout: Duration,
}

impl Default for LiveCallSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub state: ConnectionState,
    pub error: Option<String>,
    pub volume: f32,
}

struct Opened<S> {
    session: S,
    microphone: Microphone,
}

impl<S: TransportSession> Opened<S> {
    fn shut_down(&mut self) {
        self.session.close();
        self.microphone.release();
    }
}

/// What the negotiation task has produced so far. Shared with the manager so
/// a cancelled attempt can be torn down without waiting for the task.
struct Negotiated<S> {
    /// Parked here from acquisition until the session opens.
    microphone: Option<Microphone>,
    opened: Option<Opened<S>>,
}

impl<S: TransportSession> Negotiated<S> {
    fn shut_down(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.release();
        }
        if let Some(mut opened) = self.opened.take() {
            opened.shut_down();
        }
    }
}

type HandOver<S> = Arc<Mutex<Negotiated<S>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Attempt<S> {
    id: SessionId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    hand_over: HandOver<S>,
    opened: Option<Opened<S>>,
    ready_seen: bool,
}

impl<S: TransportSession> Attempt<S> {
    /// Cancels negotiation and shuts down whatever it produced so far.
    fn abandon(mut self) {
        // Cancel before inspecting the slot: a task that stores after this
        // point sees the token and shuts its session down itself.
        self.cancel.cancel();
        self.task.abort();
        if let Some(mut opened) = self.opened.take() {
            opened.shut_down();
        }
        lock(&self.hand_over).shut_down();
    }
}

struct LiveSession<S> {
    id: SessionId,
    opened: Opened<S>,
}

enum Phase<S> {
    Idle,
    Connecting(Attempt<S>),
    Connected(LiveSession<S>),
    Failed(LiveCallError),
}

/// Bookkeeping for the call summary, kept from `connect` until teardown.
struct ActiveCall {
    agent_name: Option<String>,
    started_at: Instant,
    lines: Vec<TranscriptLine>,
}

/// Single owner of one live voice call.
///
/// `connect` spawns onto the ambient Tokio runtime, so the manager must be
/// used from within one.
pub struct LiveCall<T: SessionTransport> {
    transport: Arc<T>,
    capture: Arc<dyn AudioCapture>,
    output: Arc<dyn AudioSink>,
    settings: LiveCallSettings,
    phase: Phase<T::Session>,
    volume: Volume,
    last_id: Option<SessionId>,
    active: Option<ActiveCall>,
    last_call: Option<CallSummary>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    snapshot: watch::Sender<CallSnapshot>,
}

impl<T: SessionTransport> LiveCall<T> {
    pub fn new(
        transport: Arc<T>,
        capture: Arc<dyn AudioCapture>,
        output: Arc<dyn AudioSink>,
        settings: LiveCallSettings,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let volume = Volume::default();
        let (snapshot, _) = watch::channel(CallSnapshot {
            state: ConnectionState::Idle,
            error: None,
            volume: volume.get(),
        });
        Self {
            transport,
            capture,
            output,
            settings,
            phase: Phase::Idle,
            volume,
            last_id: None,
            active: None,
            last_call: None,
            inbound_tx,
            inbound_rx,
            snapshot,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting(_) => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
            Phase::Failed(_) => ConnectionState::Error,
        }
    }

    /// Set only while in [`ConnectionState::Error`].
    pub fn error(&self) -> Option<&LiveCallError> {
        match &self.phase {
            Phase::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Playback activity of the remote voice, for a waveform indicator.
    pub fn output_level(&self) -> f32 {
        self.output.level()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    /// Summary of the most recently finished call attempt, if not taken yet.
    pub fn take_last_call(&mut self) -> Option<CallSummary> {
        self.last_call.take()
    }

    /// Sets the output gain, clamped to `[0, 1]`.
    ///
    /// Applied to the live session right away when connected; otherwise kept
    /// for the next one.
    pub fn set_volume(&mut self, value: f32) {
        let Some(volume) = Volume::new(value) else {
            warn!(value, "Ignoring non-numeric volume");
            return;
        };
        self.volume = volume;
        if let Phase::Connected(live) = &self.phase {
            live.opened.session.set_output_volume(volume);
        }
        self.publish();
    }

    /// Starts a call. Ignored unless idle or in error.
    pub fn connect(&mut self, config: SessionConfig) {
        match &self.phase {
            Phase::Connecting(attempt) => {
                warn!(session_id = %attempt.id, "Call setup already in progress; ignoring connect");
                return;
            }
            Phase::Connected(live) => {
                warn!(session_id = %live.id, "Call already connected; ignoring connect");
                return;
            }
            Phase::Idle | Phase::Failed(_) => {}
        }

        let id = self.last_id.map_or(SessionId::first(), SessionId::next);
        self.last_id = Some(id);

        let cancel = CancellationToken::new();
        let hand_over: HandOver<T::Session> = Arc::new(Mutex::new(Negotiated {
            microphone: None,
            opened: None,
        }));
        let negotiation = Negotiation {
            transport: self.transport.clone(),
            capture: self.capture.clone(),
            output: self.output.clone(),
            config: config.clone(),
            events: SessionEvents::new(id, self.inbound_tx.clone()),
            hand_over: hand_over.clone(),
            cancel: cancel.clone(),
            deadline: Instant::now() + self.settings.connect_timeout,
        };
        let task = tokio::spawn(
            negotiation
                .run()
                .instrument(info_span!("live_call", session_id = %id)),
        );

        info!(session_id = %id, agent = ?config.agent_name, voice = ?config.voice, "Dialing voice agent");
        self.active = Some(ActiveCall {
            agent_name: config.agent_name,
            started_at: Instant::now(),
            lines: Vec::new(),
        });
        self.phase = Phase::Connecting(Attempt {
            id,
            cancel,
            task,
            hand_over,
            opened: None,
            ready_seen: false,
        });
        self.publish();
    }

    /// Hangs up, cancels setup, or clears an error. Always ends in `idle`.
    pub fn disconnect(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return,
            Phase::Failed(err) => {
                debug!(error = %err, "Clearing call error");
            }
            Phase::Connecting(attempt) => {
                info!(session_id = %attempt.id, "Cancelling call setup");
                attempt.abandon();
                self.finish_call(CallOutcome::Cancelled);
            }
            Phase::Connected(mut live) => {
                info!(session_id = %live.id, "Hanging up");
                live.opened.shut_down();
                self.output.clear();
                self.finish_call(CallOutcome::Completed);
            }
        }
        self.publish();
    }

    /// Waits for the next transport or negotiation event, applies it, and
    /// returns the state afterwards.
    pub async fn next_event(&mut self) -> ConnectionState {
        // `self` keeps a sender alive, so the queue never closes.
        if let Some(inbound) = self.inbound_rx.recv().await {
            self.apply(inbound);
        }
        self.state()
    }

    /// Applies every event already queued. Returns how many were processed.
    pub fn poll_events(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.apply(inbound);
            processed += 1;
        }
        processed
    }

    fn current_id(&self) -> Option<SessionId> {
        match &self.phase {
            Phase::Connecting(attempt) => Some(attempt.id),
            Phase::Connected(live) => Some(live.id),
            Phase::Idle | Phase::Failed(_) => None,
        }
    }

    fn apply(&mut self, Inbound { id, signal }: Inbound) {
        if self.current_id() != Some(id) {
            debug!(session_id = %id, ?signal, "Discarding event for a superseded session");
            return;
        }
        if let Signal::Transcript(line) = signal {
            if let Some(active) = self.active.as_mut() {
                active.lines.push(line);
            }
            return;
        }

        self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(attempt) => self.advance_connecting(attempt, signal),
            Phase::Connected(live) => self.advance_connected(live, signal),
            settled => settled,
        };
        self.publish();
    }

    fn advance_connecting(
        &mut self,
        mut attempt: Attempt<T::Session>,
        signal: Signal,
    ) -> Phase<T::Session> {
        match signal {
            Signal::Opened => {
                attempt.opened = lock(&attempt.hand_over).opened.take();
                self.promote_if_ready(attempt)
            }
            Signal::Ready => {
                attempt.ready_seen = true;
                self.promote_if_ready(attempt)
            }
            Signal::Failed(err) => self.fail(attempt, err),
            Signal::TimedOut => {
                let err = LiveCallError::Timeout(self.settings.connect_timeout);
                self.fail(attempt, err)
            }
            Signal::Closed(CloseReason::Abnormal(message)) => {
                self.fail(attempt, LiveCallError::Connect(message))
            }
            Signal::Closed(CloseReason::Graceful) => {
                let err = LiveCallError::Connect(
                    "The voice service closed the call before it connected".into(),
                );
                self.fail(attempt, err)
            }
            Signal::Transcript(_) => Phase::Connecting(attempt),
        }
    }

    fn promote_if_ready(&mut self, mut attempt: Attempt<T::Session>) -> Phase<T::Session> {
        if !attempt.ready_seen {
            return Phase::Connecting(attempt);
        }
        let Some(opened) = attempt.opened.take() else {
            return Phase::Connecting(attempt);
        };
        // Only the watchdog is left running in the task.
        attempt.task.abort();
        opened.session.set_output_volume(self.volume);
        info!(session_id = %attempt.id, "Call connected");
        Phase::Connected(LiveSession {
            id: attempt.id,
            opened,
        })
    }

    fn fail(&mut self, attempt: Attempt<T::Session>, err: LiveCallError) -> Phase<T::Session> {
        error!(session_id = %attempt.id, error = %err, "Call setup failed");
        attempt.abandon();
        self.finish_call(CallOutcome::Failed(err.to_string()));
        Phase::Failed(err)
    }

    fn advance_connected(
        &mut self,
        mut live: LiveSession<T::Session>,
        signal: Signal,
    ) -> Phase<T::Session> {
        match signal {
            Signal::Closed(CloseReason::Graceful) => {
                info!(session_id = %live.id, "Call ended by the remote side");
                live.opened.shut_down();
                self.output.clear();
                self.finish_call(CallOutcome::Completed);
                Phase::Idle
            }
            Signal::Closed(CloseReason::Abnormal(message)) => {
                error!(session_id = %live.id, %message, "Call dropped");
                live.opened.shut_down();
                self.output.clear();
                let err = LiveCallError::AbnormalClosure(message);
                self.finish_call(CallOutcome::Failed(err.to_string()));
                Phase::Failed(err)
            }
            other => {
                debug!(session_id = %live.id, signal = ?other, "Ignoring event for connected call");
                Phase::Connected(live)
            }
        }
    }

    fn finish_call(&mut self, outcome: CallOutcome) {
        if let Some(active) = self.active.take() {
            let summary = CallSummary::new(
                active.agent_name,
                active.started_at.elapsed(),
                outcome,
                active.lines,
            );
            info!(duration_secs = summary.duration_secs(), outcome = ?summary.outcome, "Call finished");
            self.last_call = Some(summary);
        }
    }

    fn publish(&self) {
        let next = CallSnapshot {
            state: self.state(),
            error: self.error().map(ToString::to_string),
            volume: self.volume.get(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl<T: SessionTransport> Drop for LiveCall<T> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(attempt) => attempt.abandon(),
            Phase::Connected(mut live) => {
                live.opened.shut_down();
                self.output.clear();
            }
            Phase::Idle | Phase::Failed(_) => {}
        }
    }
}

/// Parks an acquired microphone where the manager can release it. Hands it
/// back when the attempt was already cancelled.
fn park<S>(
    hand_over: &HandOver<S>,
    cancel: &CancellationToken,
    microphone: Microphone,
) -> Option<Microphone> {
    let mut slot = lock(hand_over);
    if cancel.is_cancelled() {
        return Some(microphone);
    }
    slot.microphone = Some(microphone);
    None
}

/// Pairs `session` with the parked microphone and leaves both for the manager.
/// Hands the session back when the attempt was cancelled in the meantime.
fn store<S>(hand_over: &HandOver<S>, cancel: &CancellationToken, session: S) -> Option<S> {
    let mut slot = lock(hand_over);
    if cancel.is_cancelled() {
        return Some(session);
    }
    let Some(microphone) = slot.microphone.take() else {
        return Some(session);
    };
    slot.opened = Some(Opened {
        session,
        microphone,
    });
    None
}

/// Microphone acquisition and transport negotiation for one attempt.
struct Negotiation<T: SessionTransport> {
    transport: Arc<T>,
    capture: Arc<dyn AudioCapture>,
    output: Arc<dyn AudioSink>,
    config: SessionConfig,
    events: SessionEvents,
    hand_over: HandOver<T::Session>,
    cancel: CancellationToken,
    deadline: Instant,
}

impl<T: SessionTransport> Negotiation<T> {
    async fn run(self) {
        let Negotiation {
            transport,
            capture,
            output,
            config,
            events,
            hand_over,
            cancel,
            deadline,
        } = self;

        let open_events = events.clone();
        let setup_slot = hand_over.clone();
        let setup_cancel = cancel.clone();
        let setup = async move {
            let mut microphone = capture.acquire().await?;
            let frames = microphone
                .take_frames()
                .ok_or_else(|| AcquisitionError::new("Microphone stream is unavailable"))?;
            debug!(sample_rate = frames.sample_rate, "Microphone acquired");
            if let Some(mut microphone) = park(&setup_slot, &setup_cancel, microphone) {
                microphone.release();
                return Ok(None);
            }
            let session = transport
                .open(OpenRequest {
                    config,
                    microphone: frames,
                    output,
                    events: open_events,
                })
                .await?;
            Ok::<_, LiveCallError>(Some(session))
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Call setup deadline passed");
                events.signal(Signal::TimedOut);
                return;
            }
            outcome = setup => outcome,
        };

        match outcome {
            Ok(None) => return,
            Ok(Some(session)) => {
                if let Some(mut late) = store(&hand_over, &cancel, session) {
                    debug!("Call setup was cancelled; closing the late session");
                    late.close();
                    return;
                }
                events.signal(Signal::Opened);
            }
            Err(err) => {
                events.signal(Signal::Failed(err));
                return;
            }
        }

        // Watchdog: the transport still has to report ready before the deadline.
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Voice session did not become ready in time");
                events.signal(Signal::TimedOut);
            }
        }
    }
}
