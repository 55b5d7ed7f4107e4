//! The interactive `convobridge call` loop.

use crate::{
    audio::{CpalCapture, CpalPlayback},
    cli::CallArgs,
    commands::{self, Command, HELP},
    config::Config,
    reporting::CallReporter,
};
use anyhow::{Context, Result};
use convobridge_core::{
    CallOutcome, CallSummary, ConnectionState, LiveCall, LiveCallError, LiveCallSettings,
    SessionConfig,
    call_log::{CallOrigin, CallRecorder, HttpCallRecorder},
    transport::SessionTransport,
};
use gemini_realtime::{GeminiLiveConfig, GeminiLiveTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const DEFAULT_AGENT_NAME: &str = "ConvoBridge Agent";
const TERMINAL_PHONE_NUMBER: &str = "terminal";

/// Dials once with `args`, then serves stdin commands until `quit`, end of
/// input or Ctrl+C.
pub async fn run_call(config: Config, args: CallArgs) -> Result<()> {
    let mut gemini = GeminiLiveConfig::new(config.gemini_api_key.clone());
    gemini.model = config.gemini_model.clone();
    let transport = Arc::new(GeminiLiveTransport::new(gemini));
    let capture = Arc::new(CpalCapture::new(args.input_device.clone()));
    let playback = Arc::new(
        CpalPlayback::start(args.output_device.as_deref())
            .context("Failed to open the output device")?,
    );
    let mut call = LiveCall::new(
        transport,
        capture,
        playback,
        LiveCallSettings {
            connect_timeout: config.connect_timeout,
        },
    );
    call.set_volume(args.volume);

    let recorder: Option<Arc<dyn CallRecorder>> = match &config.calls_api_url {
        Some(url) if !args.no_record => {
            let http = HttpCallRecorder::new(url, config.calls_api_token.clone());
            info!("Recording finished calls to {}", http.endpoint());
            let recorder: Arc<dyn CallRecorder> = Arc::new(http);
            Some(recorder)
        }
        _ => None,
    };
    let mut reporter = CallReporter::new(
        recorder,
        CallOrigin {
            agent_id: args.agent_id.clone(),
            default_agent_name: DEFAULT_AGENT_NAME.to_string(),
            phone_number: TERMINAL_PHONE_NUMBER.to_string(),
        },
    );

    let session_config = args.session_config();
    println!("{HELP}");
    call.connect(session_config.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: Option<(ConnectionState, Option<String>)> = None;

    loop {
        let current = (call.state(), call.error().map(ToString::to_string));
        if shown.as_ref() != Some(&current) {
            println!("{}", describe_state(current.0, call.error()));
            shown = Some(current);
        }
        if let Some(summary) = call.take_last_call() {
            println!("{}", describe_summary(&summary));
            reporter.report(&summary);
        }

        tokio::select! {
            _ = call.next_event() => {}
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    info!("Input closed, hanging up.");
                    break;
                };
                match commands::parse_line(&line) {
                    Ok(Some(command)) => {
                        if !apply(&mut call, command, &session_config) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Hanging up...");
                break;
            }
        }
    }

    call.disconnect();
    if let Some(summary) = call.take_last_call() {
        println!("{}", describe_summary(&summary));
        reporter.report(&summary);
    }
    reporter.flush().await;
    Ok(())
}

/// Runs one command. Returns `false` when the loop should stop.
fn apply<T: SessionTransport>(
    call: &mut LiveCall<T>,
    command: Command,
    session_config: &SessionConfig,
) -> bool {
    match command {
        Command::Volume(value) => {
            call.set_volume(value);
            println!("Volume {}", percent(call.volume()));
        }
        Command::Mute => {
            call.set_volume(0.0);
            println!("Muted");
        }
        Command::HangUp => call.disconnect(),
        Command::Call => call.connect(session_config.clone()),
        Command::Status => println!(
            "{}",
            describe_status(call.state(), call.volume(), call.output_level(), call.error())
        ),
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn percent(value: f32) -> String {
    format!("{:.0}%", value * 100.0)
}

fn describe_state(state: ConnectionState, error: Option<&LiveCallError>) -> String {
    match (state, error) {
        (ConnectionState::Idle, _) => "Call idle. Type 'call' to dial.".to_string(),
        (ConnectionState::Connecting, _) => "Connecting...".to_string(),
        (ConnectionState::Connected, _) => "Connected. Start talking.".to_string(),
        (ConnectionState::Error, Some(error)) => format!("Call failed: {error}"),
        (ConnectionState::Error, None) => "Call failed.".to_string(),
    }
}

fn describe_status(
    state: ConnectionState,
    volume: f32,
    level: f32,
    error: Option<&LiveCallError>,
) -> String {
    let mut status = format!(
        "state={state} volume={} output_level={level:.2}",
        percent(volume)
    );
    if let Some(error) = error {
        status.push_str(&format!(" error=\"{error}\""));
    }
    status
}

fn describe_summary(summary: &CallSummary) -> String {
    let outcome = match &summary.outcome {
        CallOutcome::Completed => "completed".to_string(),
        CallOutcome::Cancelled => "cancelled before connecting".to_string(),
        CallOutcome::Failed(message) => format!("failed: {message}"),
    };
    format!(
        "Call {outcome} after {}s.\n{}",
        summary.duration_secs(),
        summary.transcript()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_describe_state() {
        assert_eq!(
            describe_state(ConnectionState::Connected, None),
            "Connected. Start talking."
        );
        let timeout = LiveCallError::Timeout(Duration::from_secs(15));
        assert_eq!(
            describe_state(ConnectionState::Error, Some(&timeout)),
            "Call failed: Connection timed out after 15 seconds"
        );
    }

    #[test]
    fn test_describe_status() {
        assert_eq!(
            describe_status(ConnectionState::Idle, 0.35, 0.0, None),
            "state=idle volume=35% output_level=0.00"
        );
        let error = LiveCallError::AbnormalClosure("network lost".into());
        assert_eq!(
            describe_status(ConnectionState::Error, 1.0, 0.25, Some(&error)),
            "state=error volume=100% output_level=0.25 error=\"network lost\""
        );
    }

    #[test]
    fn test_describe_summary() {
        let summary = CallSummary::new(
            None,
            Duration::from_millis(4_600),
            CallOutcome::Cancelled,
            vec![],
        );
        assert_eq!(
            describe_summary(&summary),
            "Call cancelled before connecting after 5s.\nCall completed."
        );
    }
}
