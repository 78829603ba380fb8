use crate::api;
use crate::core::{config::SecurityConfig, AuthCore};
use crate::store::{CredentialStore, MemoryStore, PostgresStore, VolatileStore};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::warn;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub token_secret: SecretString,
    pub backup_pepper: SecretString,
    pub enrollment_codes: Vec<String>,
    pub origin: Option<String>,
    pub totp_issuer: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (store, volatile): (Arc<dyn CredentialStore>, Arc<dyn VolatileStore>) = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            let store = Arc::new(PostgresStore::new(pool));
            (store.clone() as _, store as _)
        }
        None => {
            warn!("no --dsn provided, using the in-process store; state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone() as _, store as _)
        }
    };

    let config = SecurityConfig::new(args.token_secret, args.backup_pepper)
        .with_enrollment_codes(args.enrollment_codes)
        .with_totp_issuer(args.totp_issuer);

    let core = Arc::new(AuthCore::new(store, volatile, config));

    api::serve(args.port, core, args.origin.as_deref()).await
}
