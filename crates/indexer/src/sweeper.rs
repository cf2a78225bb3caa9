//! Periodic expiry of stale incomplete chunk uploads.
//!
//! Abandoned multi-part uploads never complete on their own; without this
//! task their chunks accumulate forever.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::processor::EmojiStore;
use crate::shutdown::Shutdown;

pub async fn run<S: EmojiStore>(store: S, ttl: Duration, interval: Duration, shutdown: Arc<Shutdown>) {
    info!(
        "cleanup sweeper running every {} (ttl {})",
        humantime::format_duration(interval),
        humantime::format_duration(ttl)
    );

    loop {
        if !shutdown.sleep(interval).await {
            break;
        }

        match store.cleanup_incomplete(ttl).await {
            Ok((chunks, sets)) if chunks > 0 || sets > 0 => {
                info!("expired {} stale chunks and {} chunk sets", chunks, sets);
            }
            Ok(_) => {}
            Err(e) => warn!("cleanup incomplete chunks: {}", e),
        }
    }

    info!("cleanup sweeper stopping");
}
