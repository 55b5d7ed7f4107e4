//! Reporting finished calls to the dashboard's calls API.

use crate::generic_types::{CallOutcome, CallSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const SNIPPET_CHARS: usize = 160;

/// Body of `POST /calls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub agent_id: String,
    pub agent_name: String,
    pub phone_number: String,
    /// Seconds.
    pub duration: u64,
    pub outcome: String,
    pub transcript: String,
    pub transcript_snippet: String,
    pub status: CallStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Completed,
    Missed,
    InProgress,
    Failed,
}

/// Identifies where a call came from when it is written to the call log.
#[derive(Debug, Clone)]
pub struct CallOrigin {
    pub agent_id: String,
    /// Used when the session config carried no agent name.
    pub default_agent_name: String,
    pub phone_number: String,
}

impl CallRecord {
    pub fn from_summary(summary: &CallSummary, origin: &CallOrigin) -> Self {
        let transcript = summary.transcript();
        let transcript_snippet = snippet(&transcript);
        let (outcome, status) = match &summary.outcome {
            CallOutcome::Completed => ("Completed".to_string(), CallStatus::Completed),
            CallOutcome::Cancelled => (
                "Cancelled before connecting".to_string(),
                CallStatus::Missed,
            ),
            CallOutcome::Failed(message) => (format!("Failed: {message}"), CallStatus::Failed),
        };
        Self {
            agent_id: origin.agent_id.clone(),
            agent_name: summary
                .agent_name
                .clone()
                .unwrap_or_else(|| origin.default_agent_name.clone()),
            phone_number: origin.phone_number.clone(),
            duration: summary.duration_secs(),
            outcome,
            transcript,
            transcript_snippet,
            status,
        }
    }
}

fn snippet(transcript: &str) -> String {
    let flat = transcript.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Persists finished calls.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait CallRecorder: Send + Sync {
    async fn record(&self, record: CallRecord) -> Result<()>;
}

/// `CallRecorder` backed by the REST calls API.
pub struct HttpCallRecorder {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpCallRecorder {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/calls", base_url.trim_end_matches('/')),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CallRecorder for HttpCallRecorder {
    async fn record(&self, record: CallRecord) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach calls API at {}", self.endpoint))?;
        response
            .error_for_status()
            .context("Calls API rejected the call record")?;
        info!(agent_id = %record.agent_id, duration = record.duration, "Call record saved");
        Ok(())
    }
}
