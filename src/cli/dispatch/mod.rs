//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();
    let token_secret = matches
        .get_one::<String>(commands::ARG_TOKEN_SECRET)
        .cloned()
        .context("missing required argument: --token-secret")?;
    let backup_pepper = matches
        .get_one::<String>(commands::ARG_BACKUP_PEPPER)
        .cloned()
        .context("missing required argument: --backup-pepper")?;
    let enrollment_codes = matches
        .get_one::<String>(commands::ARG_ENROLLMENT_CODES)
        .map(|codes| {
            codes
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let origin = matches.get_one::<String>(commands::ARG_ORIGIN).cloned();
    let totp_issuer = matches
        .get_one::<String>(commands::ARG_TOTP_ISSUER)
        .cloned()
        .unwrap_or_else(|| "Vigil".to_string());

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: SecretString::from(token_secret),
        backup_pepper: SecretString::from(backup_pepper),
        enrollment_codes,
        origin,
        totp_issuer,
    }))
}

#[cfg(test)]
mod tests {
    use super::handler;
    use crate::cli::actions::Action;
    use crate::cli::commands;

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(
            [
                ("VIGIL_TOKEN_SECRET", None::<&str>),
                ("VIGIL_BACKUP_PEPPER", None),
                ("VIGIL_DSN", None),
                ("VIGIL_ENROLLMENT_CODES", None),
            ],
            || {
                let matches = commands::new()
                    .try_get_matches_from([
                        "vigil",
                        "--token-secret",
                        "secret",
                        "--backup-pepper",
                        "pepper",
                        "--enrollment-codes",
                        "alpha, beta,,gamma",
                    ])
                    .unwrap();
                let Action::Server(args) = handler(&matches).unwrap();
                assert_eq!(args.port, 8080);
                assert!(args.dsn.is_none());
                assert_eq!(args.enrollment_codes, vec!["alpha", "beta", "gamma"]);
                assert_eq!(args.totp_issuer, "Vigil");
            },
        );
    }
}
