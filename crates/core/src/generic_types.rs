//! Provider-agnostic values exchanged between the UI consumer, the call
//! manager and the realtime transport.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call settings handed to `LiveCall::connect`.
///
/// Every field is optional; anything left out falls back to whatever the
/// voice backend uses by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub system_prompt: Option<String>,
    pub test_scenario: Option<String>,
    pub voice: Option<String>,
    pub context: Option<String>,
    pub agent_name: Option<String>,
}

impl SessionConfig {
    /// Builds the system instruction sent to the voice backend.
    ///
    /// Returns `None` when nothing was configured so the backend keeps its own
    /// default persona.
    pub fn instructions(&self) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(prompt) = non_empty(&self.system_prompt) {
            sections.push(prompt.to_string());
        }
        if let Some(name) = non_empty(&self.agent_name) {
            sections.push(format!("Your name is {name}. Introduce yourself by name."));
        }
        if let Some(context) = non_empty(&self.context) {
            sections.push(format!("Business context:\n{context}"));
        }
        if let Some(scenario) = non_empty(&self.test_scenario) {
            sections.push(format!(
                "This is a test call. Play along with the following scenario:\n{scenario}"
            ));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// The configured voice, ignoring blank strings.
    pub fn voice_name(&self) -> Option<&str> {
        non_empty(&self.voice)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// The externally visible state of the live call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// How a transport session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Either side asked to hang up and the close was acknowledged.
    Graceful,
    /// The connection dropped; carries a human-readable cause.
    Abnormal(String),
}

/// Who said a transcribed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

/// A fragment of transcription reported by the voice backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}

/// How a finished call attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call was connected and then hung up by either side.
    Completed,
    /// The caller hung up before the call connected.
    Cancelled,
    /// The attempt or the call failed with the given message.
    Failed(String),
}

/// Duration and transcript of one finished call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub agent_name: Option<String>,
    pub duration: Duration,
    pub outcome: CallOutcome,
    lines: Vec<TranscriptLine>,
}

impl CallSummary {
    pub fn new(
        agent_name: Option<String>,
        duration: Duration,
        outcome: CallOutcome,
        lines: Vec<TranscriptLine>,
    ) -> Self {
        Self {
            agent_name,
            duration,
            outcome,
            lines,
        }
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    /// Renders the transcript one turn per line, merging consecutive
    /// fragments from the same speaker.
    ///
    /// An empty conversation is reported as `"Call completed."`.
    pub fn transcript(&self) -> String {
        let mut turns: Vec<(Speaker, String)> = Vec::new();
        for line in &self.lines {
            match turns.last_mut() {
                Some((speaker, text)) if *speaker == line.speaker => text.push_str(&line.text),
                _ => turns.push((line.speaker, line.text.clone())),
            }
        }
        let rendered: Vec<String> = turns
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(speaker, text)| {
                let who = match speaker {
                    Speaker::Caller => "Caller",
                    Speaker::Agent => self.agent_name.as_deref().unwrap_or("Agent"),
                };
                format!("{who}: {}", text.trim())
            })
            .collect();
        if rendered.is_empty() {
            "Call completed.".to_string()
        } else {
            rendered.join("\n")
        }
    }

    /// Call length rounded to whole seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs_f64().round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_absent_when_unconfigured() {
        assert_eq!(SessionConfig::default().instructions(), None);

        let blank = SessionConfig {
            system_prompt: Some("   ".into()),
            voice: Some("".into()),
            ..Default::default()
        };
        assert_eq!(blank.instructions(), None);
        assert_eq!(blank.voice_name(), None);
    }

    #[test]
    fn test_instructions_combine_fields_in_order() {
        let config = SessionConfig {
            system_prompt: Some("You book dental appointments.".into()),
            agent_name: Some("Emma".into()),
            context: Some("Open Mon-Fri.".into()),
            test_scenario: Some("Caller wants a Saturday slot.".into()),
            voice: Some("Aoede".into()),
        };
        let text = config.instructions().unwrap();

        let prompt_at = text.find("dental").unwrap();
        let name_at = text.find("Emma").unwrap();
        let context_at = text.find("Mon-Fri").unwrap();
        let scenario_at = text.find("Saturday").unwrap();
        assert!(prompt_at < name_at && name_at < context_at && context_at < scenario_at);
        assert_eq!(config.voice_name(), Some("Aoede"));
    }

    #[test]
    fn test_session_config_deserializes_camel_case() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"agentName":"Emma","testScenario":"refund"}"#).unwrap();
        assert_eq!(config.agent_name.as_deref(), Some("Emma"));
        assert_eq!(config.test_scenario.as_deref(), Some("refund"));
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_transcript_merges_fragments_per_turn() {
        let lines = vec![
            TranscriptLine {
                speaker: Speaker::Agent,
                text: "Hi, this is ".into(),
            },
            TranscriptLine {
                speaker: Speaker::Agent,
                text: "Emma.".into(),
            },
            TranscriptLine {
                speaker: Speaker::Caller,
                text: " I need a booking ".into(),
            },
        ];
        let summary = CallSummary::new(
            Some("Emma".into()),
            Duration::from_millis(61_600),
            CallOutcome::Completed,
            lines,
        );

        assert_eq!(summary.transcript(), "Emma: Hi, this is Emma.\nCaller: I need a booking");
        assert_eq!(summary.duration_secs(), 62);
    }

    #[test]
    fn test_empty_transcript_placeholder() {
        let summary = CallSummary::new(None, Duration::ZERO, CallOutcome::Cancelled, vec![]);
        assert_eq!(summary.transcript(), "Call completed.");
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }
}
