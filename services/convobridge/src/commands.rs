//! Line commands typed into the terminal during a call.

/// One parsed stdin command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Output volume, clamped by the call manager.
    Volume(f32),
    Mute,
    HangUp,
    Call,
    Status,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'. Type 'help' for the list of commands.")]
    Unknown(String),
    #[error("'{0}' needs a value")]
    MissingArgument(&'static str),
    #[error("Invalid volume '{0}': expected a number between 0 and 1")]
    InvalidVolume(String),
}

pub const HELP: &str = "\
Commands:
  volume <0..1>   set output volume
  mute            set output volume to 0
  hangup          end the current call
  call            dial again with the same settings
  status          show call state, volume and output level
  quit            hang up and exit";

/// Parses one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "volume" | "vol" => {
            let raw = words.next().ok_or(CommandError::MissingArgument("volume"))?;
            let value = raw
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CommandError::InvalidVolume(raw.to_string()))?;
            Command::Volume(value)
        }
        "mute" => Command::Mute,
        "hangup" | "hang-up" | "end" => Command::HangUp,
        "call" | "dial" | "redial" => Command::Call,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("volume 0.3"), Ok(Some(Command::Volume(0.3))));
        assert_eq!(parse_line("  MUTE "), Ok(Some(Command::Mute)));
        assert_eq!(parse_line("hangup"), Ok(Some(Command::HangUp)));
        assert_eq!(parse_line("redial"), Ok(Some(Command::Call)));
        assert_eq!(parse_line("status"), Ok(Some(Command::Status)));
        assert_eq!(parse_line("q"), Ok(Some(Command::Quit)));
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn test_out_of_range_volume_is_left_to_the_call() {
        assert_eq!(parse_line("volume 7"), Ok(Some(Command::Volume(7.0))));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_line("volume"),
            Err(CommandError::MissingArgument("volume"))
        );
        assert_eq!(
            parse_line("volume loud"),
            Err(CommandError::InvalidVolume("loud".into()))
        );
        assert_eq!(
            parse_line("volume NaN"),
            Err(CommandError::InvalidVolume("NaN".into()))
        );
        assert_eq!(
            parse_line("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }
}
