use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("VIGIL_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::validator_log_level;

    #[test]
    fn repeated_flag_counts() {
        let command = clap::Command::new("test").arg(
            clap::Arg::new("verbosity")
                .long("verbose")
                .action(clap::ArgAction::Count),
        );
        let matches = command.get_matches_from(["test", "--verbose", "--verbose"]);
        assert_eq!(matches.get_count("verbosity"), 2);
    }

    #[test]
    fn level_parser_in_context() {
        let command = clap::Command::new("test").arg(
            clap::Arg::new("level")
                .long("level")
                .value_parser(validator_log_level()),
        );
        let matches = command.get_matches_from(["test", "--level", "debug"]);
        assert_eq!(matches.get_one::<u8>("level").copied(), Some(3));

        let command = clap::Command::new("test").arg(
            clap::Arg::new("level")
                .long("level")
                .value_parser(validator_log_level()),
        );
        assert!(command
            .try_get_matches_from(["test", "--level", "chatty"])
            .is_err());
    }
}
