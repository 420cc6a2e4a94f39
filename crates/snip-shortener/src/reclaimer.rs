use jiff::Timestamp;
use snip_core::error::StoreError;
use snip_core::{Clock, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Deletes every record that has expired at `now` and returns how many went.
///
/// Scans the whole store once, then issues a single batch delete. The two
/// steps are not one transaction: a record whose `max_age` is extended
/// between them is still deleted.
pub async fn purge_expired<S: Store>(store: &S, now: Timestamp) -> Result<usize, StoreError> {
    let mut expired = Vec::new();
    store
        .for_each(&mut |key, record| {
            if record.is_expired(now) {
                expired.push(key.to_string());
            }
            Ok(())
        })
        .await?;

    if !expired.is_empty() {
        store.delete(&expired).await?;
    }

    Ok(expired.len())
}

/// Handle to the background task that reclaims expired records.
///
/// Dropping the handle signals the task to stop; [`Reclaimer::stop`] also
/// waits for it to exit.
#[derive(Debug)]
pub struct Reclaimer {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    /// Spawns the sweep loop on the current Tokio runtime.
    ///
    /// The first sweep runs right away, then one every `interval`. Returns
    /// `None` when called outside a runtime; expired records are then only
    /// removed by explicit [`purge_expired`] calls.
    pub fn start<S: Store, C: Clock>(
        store: Arc<S>,
        clock: Arc<C>,
        interval: Duration,
        max_consecutive_failures: u32,
    ) -> Option<Self> {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime available, reclaimer not started");
            return None;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(reclaim_loop(
            store,
            clock,
            interval,
            max_consecutive_failures.max(1),
            shutdown_rx,
        ));

        info!(interval_secs = interval.as_secs(), "reclaimer started");

        Some(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Whether the loop has exited, either stopped or given up.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "reclaimer task did not exit cleanly");
            }
        }
        info!("reclaimer stopped");
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn reclaim_loop<S: Store, C: Clock>(
    store: Arc<S>,
    clock: Arc<C>,
    interval: Duration,
    max_consecutive_failures: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // tokio intervals must be non-zero
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("reclaimer received shutdown signal");
                    return;
                }
                continue;
            }
        }

        match purge_expired(store.as_ref(), clock.now()).await {
            Ok(purged) => {
                failures = 0;
                if purged > 0 {
                    info!(purged, "purged expired records");
                } else {
                    trace!("no expired records");
                }
            }
            Err(StoreError::Closed) => {
                debug!("store closed, reclaimer exiting");
                return;
            }
            Err(e) => {
                failures += 1;
                if failures >= max_consecutive_failures {
                    error!(error = %e, failures, "reclaimer giving up after repeated failures");
                    return;
                }
                warn!(error = %e, failures, "reclamation sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jiff::SignedDuration;
    use snip_core::error::Result;
    use snip_core::id::EPOCH_SECOND;
    use snip_core::{Id, IdGenerator, ManualClock, Record, Visitor};
    use snip_storage::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> Timestamp {
        Timestamp::from_second(EPOCH_SECOND + 1_000_000).unwrap()
    }

    async fn insert(store: &InMemoryStore, url: &str, max_age: SignedDuration) -> Id {
        let mut record = Record::new(url).with_max_age(max_age);
        let generate = |counter| Id::new(1, start(), counter);
        store.put(&generate, &mut record).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = InMemoryStore::new();
        let short = insert(&store, "https://short.com", SignedDuration::from_secs(1)).await;
        let long = insert(&store, "https://long.com", SignedDuration::from_hours(1)).await;
        let forever = insert(&store, "https://forever.com", SignedDuration::ZERO).await;

        assert_eq!(purge_expired(&store, start()).await.unwrap(), 0);

        let later = start() + SignedDuration::from_secs(2);
        assert_eq!(purge_expired(&store, later).await.unwrap(), 1);
        assert!(store.get(&short.to_string()).await.unwrap().is_none());
        assert!(store.get(&long.to_string()).await.unwrap().is_some());
        assert!(store.get(&forever.to_string()).await.unwrap().is_some());

        let much_later = start() + SignedDuration::from_hours(24);
        assert_eq!(purge_expired(&store, much_later).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn start_outside_runtime_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        assert!(Reclaimer::start(store, clock, Duration::from_secs(1), 3).is_none());
    }

    /// A store whose scans always fail.
    struct BrokenStore {
        scans: AtomicUsize,
    }

    #[async_trait]
    impl Store for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Record>> {
            Ok(None)
        }

        async fn put(&self, _generate: IdGenerator<'_>, _record: &mut Record) -> Result<()> {
            Err(StoreError::Unavailable("broken".to_string()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<()> {
            Ok(())
        }

        async fn for_each(&self, _visit: Visitor<'_>) -> Result<()> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("broken".to_string()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_consecutive_failures() {
        let store = Arc::new(BrokenStore {
            scans: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(start()));
        let reclaimer = Reclaimer::start(Arc::clone(&store), clock, Duration::from_millis(5), 3)
            .expect("inside a runtime");

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.scans.load(Ordering::SeqCst), 3);
        assert!(reclaimer.is_finished());
        reclaimer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_until_stopped() {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(start());
        let id = insert(&store, "https://example.com", SignedDuration::from_secs(1)).await;

        let reclaimer = Reclaimer::start(
            Arc::clone(&store),
            Arc::new(clock.clone()),
            Duration::from_secs(60),
            3,
        )
        .expect("inside a runtime");

        // the immediate first sweep finds nothing expired
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get(&id.to_string()).await.unwrap().is_some());

        clock.advance(SignedDuration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.get(&id.to_string()).await.unwrap().is_none());

        assert!(!reclaimer.is_finished());
        reclaimer.stop().await;
    }
}
