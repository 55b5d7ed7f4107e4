use clap::{Args, Parser, Subcommand};
use convobridge_core::SessionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "convobridge",
    version,
    about = "Talk to a ConvoBridge voice agent from the terminal"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Start a live call and control it from stdin.
    Call(CallArgs),
    /// List audio input and output devices.
    Devices,
}

#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// Name the agent introduces itself with.
    #[arg(long)]
    pub agent_name: Option<String>,
    /// Agent id written to the call log.
    #[arg(long, default_value = "demo-agent")]
    pub agent_id: String,
    /// Prebuilt voice, e.g. Puck, Kore, Charon.
    #[arg(long)]
    pub voice: Option<String>,
    #[arg(long)]
    pub system_prompt: Option<String>,
    /// Business context the agent should know about.
    #[arg(long)]
    pub context: Option<String>,
    /// Test scenario the agent should play along with.
    #[arg(long)]
    pub scenario: Option<String>,
    /// Initial output volume between 0 and 1.
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,
    /// Do not post finished calls to the calls API.
    #[arg(long)]
    pub no_record: bool,
    #[arg(long)]
    pub input_device: Option<String>,
    #[arg(long)]
    pub output_device: Option<String>,
}

impl CallArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: self.system_prompt.clone(),
            test_scenario: self.scenario.clone(),
            voice: self.voice.clone(),
            context: self.context.clone(),
            agent_name: self.agent_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_defaults() {
        let cli = Cli::try_parse_from(["convobridge", "call"]).unwrap();
        let CliCommand::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.agent_id, "demo-agent");
        assert_eq!(args.volume, 1.0);
        assert!(!args.no_record);
        assert_eq!(args.session_config(), SessionConfig::default());
    }

    #[test]
    fn test_call_flags_map_to_session_config() {
        let cli = Cli::try_parse_from([
            "convobridge",
            "call",
            "--agent-name",
            "Emma",
            "--voice",
            "Kore",
            "--scenario",
            "Angry customer",
            "--volume",
            "0.5",
            "--no-record",
        ])
        .unwrap();
        let CliCommand::Call(args) = cli.command else {
            panic!("expected call");
        };
        let config = args.session_config();
        assert_eq!(config.agent_name.as_deref(), Some("Emma"));
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert_eq!(config.test_scenario.as_deref(), Some("Angry customer"));
        assert_eq!(args.volume, 0.5);
        assert!(args.no_record);
    }

    #[test]
    fn test_devices_subcommand() {
        let cli = Cli::try_parse_from(["convobridge", "devices"]).unwrap();
        assert!(matches!(cli.command, CliCommand::Devices));
    }
}
