//! Hands finished calls to the call log without blocking the terminal.

use convobridge_core::{
    CallSummary,
    call_log::{CallOrigin, CallRecord, CallRecorder},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub struct CallReporter {
    recorder: Option<Arc<dyn CallRecorder>>,
    origin: CallOrigin,
    pending: JoinSet<()>,
}

impl CallReporter {
    /// `recorder` is `None` when recording is disabled.
    pub fn new(recorder: Option<Arc<dyn CallRecorder>>, origin: CallOrigin) -> Self {
        Self {
            recorder,
            origin,
            pending: JoinSet::new(),
        }
    }

    /// Starts saving `summary` in the background. Failures are only logged.
    pub fn report(&mut self, summary: &CallSummary) {
        let Some(recorder) = self.recorder.clone() else {
            debug!("Call recording disabled, skipping call record.");
            return;
        };
        let record = CallRecord::from_summary(summary, &self.origin);
        self.pending.spawn(async move {
            if let Err(e) = recorder.record(record).await {
                error!("Failed to save call record: {e:#}");
            }
        });
    }

    /// Waits for every record still being saved.
    pub async fn flush(&mut self) {
        while self.pending.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convobridge_core::{CallOutcome, call_log::MockCallRecorder};
    use std::time::Duration;

    fn origin() -> CallOrigin {
        CallOrigin {
            agent_id: "agent-7".into(),
            default_agent_name: "ConvoBridge Agent".into(),
            phone_number: "terminal".into(),
        }
    }

    fn summary(outcome: CallOutcome) -> CallSummary {
        CallSummary::new(Some("Emma".into()), Duration::from_secs(12), outcome, vec![])
    }

    #[tokio::test]
    async fn test_reports_each_finished_call() {
        let mut recorder = MockCallRecorder::new();
        recorder
            .expect_record()
            .withf(|record| record.agent_id == "agent-7" && record.duration == 12)
            .times(2)
            .returning(|_| Ok(()));

        let recorder: Arc<dyn CallRecorder> = Arc::new(recorder);
        let mut reporter = CallReporter::new(Some(recorder), origin());
        reporter.report(&summary(CallOutcome::Completed));
        reporter.report(&summary(CallOutcome::Cancelled));
        reporter.flush().await;
    }

    #[tokio::test]
    async fn test_recorder_failure_is_swallowed() {
        let mut recorder = MockCallRecorder::new();
        recorder
            .expect_record()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("calls API unavailable")));

        let recorder: Arc<dyn CallRecorder> = Arc::new(recorder);
        let mut reporter = CallReporter::new(Some(recorder), origin());
        reporter.report(&summary(CallOutcome::Failed("network lost".into())));
        reporter.flush().await;
    }

    #[tokio::test]
    async fn test_disabled_reporter_does_nothing() {
        let mut reporter = CallReporter::new(None, origin());
        reporter.report(&summary(CallOutcome::Completed));
        reporter.flush().await;
    }
}
