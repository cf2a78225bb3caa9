//! Database connection management for the hivemoji store.

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::{info, warn};

use crate::error::Result;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connects to Postgres with pool settings sized for one follower plus the
/// read API.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let mut opt = ConnectOptions::new(database_url.to_string());
        opt.max_connections(20)
            .min_connections(2)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        match Database::connect(opt).await {
            Ok(connection) => {
                info!("Connected to Postgres");
                return Ok(connection);
            }
            Err(e) if attempts < MAX_ATTEMPTS => {
                warn!(
                    "Failed to connect to Postgres (attempt {}/{}): {}",
                    attempts, MAX_ATTEMPTS, e
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
