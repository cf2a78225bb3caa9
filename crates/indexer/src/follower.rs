//! Sequential block ingestion: resume from the cursor, follow the chain
//! head, retry the same height until it lands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hive::BlockFetcher;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ProcessError;
use crate::processor::{EmojiStore, Processor};
use crate::shutdown::Shutdown;

/// Drives the ingestion loop over an injected block source.
pub struct BlockFollower<F, S> {
    fetcher: F,
    processor: Processor<S>,
    start_block: i64,
    poll_interval: Duration,
    catchup_interval: Duration,
    shutdown: Arc<Shutdown>,
}

impl<F: BlockFetcher, S: EmojiStore> BlockFollower<F, S> {
    pub fn new(fetcher: F, processor: Processor<S>, cfg: &Config, shutdown: Arc<Shutdown>) -> Self {
        Self {
            fetcher,
            processor,
            start_block: cfg.start_block,
            poll_interval: cfg.poll_interval,
            catchup_interval: cfg.catchup_poll_interval,
            shutdown,
        }
    }

    /// Runs until shutdown. A block is only left behind once every op in it
    /// has been applied and the cursor write succeeded.
    pub async fn run(&self) -> Result<()> {
        let last = self.processor.store().last_block().await?;

        let mut current = self.start_block;
        if last > 0 && last + 1 > current {
            current = last + 1;
        }

        info!("starting ingestion from block {}", current);

        // Last known chain head, refreshed lazily when waiting.
        let mut head: i64 = 0;

        loop {
            if self.shutdown.is_triggered() {
                info!("ingest loop stopping");
                return Ok(());
            }

            let block = match self.fetcher.get_block(current).await {
                Ok(block) => block,
                Err(e) => {
                    warn!("fetch block {}: {}", current, e);
                    if !self.wait(current, &mut head).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(block) = block else {
                // Not yet produced.
                if !self.wait(current, &mut head).await {
                    return Ok(());
                }
                continue;
            };

            match self.processor.process_block(&block, &self.shutdown).await {
                Ok(()) => current += 1,
                Err(ProcessError::Cancelled) => {
                    info!("ingest loop stopping");
                    return Ok(());
                }
                Err(e) => {
                    error!("process block {}: {}", current, e);
                    if !self.wait(current, &mut head).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleeps before retrying `current`. While the chain head is known to be
    /// further ahead the shorter catch-up interval applies; at the head (or
    /// when the head is unknown) the regular poll interval does. Returns
    /// false when shutdown interrupted the wait.
    async fn wait(&self, current: i64, head: &mut i64) -> bool {
        if *head <= current {
            match self.fetcher.head_block_number().await {
                Ok(number) => *head = number,
                Err(e) => warn!("head block number: {}", e),
            }
        }

        let interval = retry_interval(*head, current, self.poll_interval, self.catchup_interval);
        self.shutdown.sleep(interval).await
    }
}

fn retry_interval(head: i64, current: i64, poll: Duration, catchup: Duration) -> Duration {
    if head > current + 1 {
        catchup
    } else {
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hive::Block;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;
    use storage::{AssembledSet, ChunkPayload, RegisterV1, StoreError};

    struct ScriptedFetcher {
        /// Heights that fail once before the block is served.
        fail_once: Mutex<Vec<i64>>,
        blocks: HashMap<i64, Block>,
        requests: Mutex<Vec<i64>>,
        head: i64,
    }

    impl ScriptedFetcher {
        fn new(max_block: i64) -> Self {
            let blocks = (1..=max_block)
                .map(|number| {
                    (
                        number,
                        Block {
                            number,
                            transactions: Vec::new(),
                        },
                    )
                })
                .collect();
            Self {
                fail_once: Mutex::new(Vec::new()),
                blocks,
                requests: Mutex::new(Vec::new()),
                head: max_block,
            }
        }
    }

    #[async_trait]
    impl BlockFetcher for ScriptedFetcher {
        async fn get_block(&self, number: i64) -> anyhow::Result<Option<Block>> {
            self.requests.lock().unwrap().push(number);
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(index) = fail_once.iter().position(|n| *n == number) {
                fail_once.remove(index);
                anyhow::bail!("connection reset");
            }
            Ok(self.blocks.get(&number).cloned())
        }

        async fn head_block_number(&self) -> anyhow::Result<i64> {
            Ok(self.head)
        }
    }

    #[derive(Default)]
    struct CursorStore {
        last_block: AtomicI64,
    }

    #[async_trait]
    impl EmojiStore for CursorStore {
        async fn upsert_v1(&self, _payload: RegisterV1) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_emoji(&self, _author: &str, _name: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn save_chunk(
            &self,
            _chunk: ChunkPayload,
        ) -> Result<Option<AssembledSet>, StoreError> {
            Ok(None)
        }

        async fn get_chunk_set(
            &self,
            _upload_id: &str,
            _kind: &str,
        ) -> Result<Option<AssembledSet>, StoreError> {
            Ok(None)
        }

        async fn upsert_from_chunks(
            &self,
            _main: &AssembledSet,
            _fallback: Option<&AssembledSet>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn set_last_block(&self, number: i64) -> Result<(), StoreError> {
            self.last_block.store(number, Ordering::SeqCst);
            Ok(())
        }

        async fn last_block(&self) -> Result<i64, StoreError> {
            Ok(self.last_block.load(Ordering::SeqCst))
        }

        async fn cleanup_incomplete(&self, _ttl: Duration) -> Result<(u64, u64), StoreError> {
            Ok((0, 0))
        }
    }

    fn test_config() -> Config {
        Config {
            hive_rpc_url: String::new(),
            postgres_dsn: String::new(),
            server_addr: ":0".to_string(),
            start_block: 1,
            poll_interval: Duration::from_millis(5),
            catchup_poll_interval: Duration::from_millis(1),
            incomplete_chunk_ttl: Duration::from_secs(3600),
            incomplete_cleanup_interval: Duration::from_secs(600),
        }
    }

    async fn wait_for_cursor(store: &Arc<CursorStore>, target: i64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.last_block.load(Ordering::SeqCst) >= target {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("follower never reached target block");
    }

    #[tokio::test]
    async fn processes_blocks_in_order_and_parks_at_head() {
        let fetcher = Arc::new(ScriptedFetcher::new(3));
        let store = Arc::new(CursorStore::default());
        let shutdown = Arc::new(Shutdown::new());

        let follower = BlockFollower::new(
            fetcher.clone(),
            Processor::new(store.clone()),
            &test_config(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { follower.run().await });

        wait_for_cursor(&store, 3).await;
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(&requests[..3], &[1, 2, 3]);
        // Block 4 does not exist yet, so the follower keeps asking for it.
        assert!(requests[3..].iter().all(|number| *number == 4));
    }

    #[tokio::test]
    async fn resumes_from_the_cursor() {
        let fetcher = Arc::new(ScriptedFetcher::new(0));
        let store = Arc::new(CursorStore::default());
        store.last_block.store(101482212, Ordering::SeqCst);
        let shutdown = Arc::new(Shutdown::new());

        let follower = BlockFollower::new(
            fetcher.clone(),
            Processor::new(store.clone()),
            &test_config(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { follower.run().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !fetcher.requests.lock().unwrap().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("follower never fetched");

        shutdown.trigger();
        handle.await.unwrap().unwrap();

        assert_eq!(fetcher.requests.lock().unwrap()[0], 101482213);
    }

    #[tokio::test]
    async fn transient_fetch_failure_retries_same_block() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        fetcher.fail_once.lock().unwrap().push(1);
        let store = Arc::new(CursorStore::default());
        let shutdown = Arc::new(Shutdown::new());

        let follower = BlockFollower::new(
            fetcher.clone(),
            Processor::new(store.clone()),
            &test_config(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { follower.run().await });

        wait_for_cursor(&store, 2).await;
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        // The failed fetch of block 1 repeated before anything advanced.
        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(&requests[..3], &[1, 1, 2]);
    }

    #[test]
    fn catchup_pacing_applies_only_while_behind() {
        let poll = Duration::from_secs(3);
        let catchup = Duration::from_millis(500);

        // Far behind the head: catch up quickly.
        assert_eq!(retry_interval(100, 1, poll, catchup), catchup);
        // At the head (or one block short of it): regular polling.
        assert_eq!(retry_interval(5, 4, poll, catchup), poll);
        assert_eq!(retry_interval(5, 5, poll, catchup), poll);
        // Head unknown: regular polling.
        assert_eq!(retry_interval(0, 7, poll, catchup), poll);
    }
}
