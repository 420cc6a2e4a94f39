use crate::error::{Result, ShortenerError};
use crate::reclaimer::{self, Reclaimer};
use crate::settings::ShortenerSettings;
use jiff::SignedDuration;
use parking_lot::Mutex;
use snip_core::{Clock, Id, IdError, Meta, Record, Store, StoreError, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// The URL shortener facade.
///
/// Validates targets, drives identifier assignment through the backing
/// [`Store`] and owns the background [`Reclaimer`] if one is configured.
///
/// Identifiers embed the configured origin tag, the creation second taken
/// from the clock and the store's sequence counter.
#[derive(Debug)]
pub struct Shortener<S, C = SystemClock> {
    store: Arc<S>,
    clock: Arc<C>,
    origin: u32,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl<S: Store> Shortener<S> {
    /// Creates a shortener reading the wall clock.
    ///
    /// The reclaimer only starts when this runs inside a Tokio runtime.
    pub fn new(store: S, settings: ShortenerSettings) -> Self {
        Self::with_clock(store, settings, SystemClock)
    }
}

impl<S: Store, C: Clock> Shortener<S, C> {
    pub fn with_clock(store: S, settings: ShortenerSettings, clock: C) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(clock);

        let reclaimer = settings.reclaim_interval.and_then(|interval| {
            Reclaimer::start(
                Arc::clone(&store),
                Arc::clone(&clock),
                interval,
                settings.max_consecutive_failures,
            )
        });

        Self {
            store,
            clock,
            origin: settings.origin,
            reclaimer: Mutex::new(reclaimer),
        }
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether the background reclaimer is running.
    pub fn is_reclaiming(&self) -> bool {
        self.reclaimer
            .lock()
            .as_ref()
            .is_some_and(|reclaimer| !reclaimer.is_finished())
    }

    /// Shortens `url` into a record that never expires.
    pub async fn generate(&self, url: &str) -> Result<Id> {
        self.generate_with(url, None, Meta::new()).await
    }

    /// Shortens `url` into a record that expires `max_age` after creation.
    /// A zero `max_age` never expires.
    pub async fn generate_timed(&self, url: &str, max_age: Duration) -> Result<Id> {
        self.generate_with(url, Some(max_age), Meta::new()).await
    }

    /// Shortens `url`, attaching `meta` to the stored record.
    pub async fn generate_with(
        &self,
        url: &str,
        max_age: Option<Duration>,
        meta: Meta,
    ) -> Result<Id> {
        validate_target(url)?;

        let max_age = max_age
            .map(|d| SignedDuration::try_from(d).unwrap_or(SignedDuration::MAX))
            .unwrap_or(SignedDuration::ZERO);
        let mut record = Record::new(url).with_max_age(max_age).with_meta(meta);

        let origin = self.origin;
        let clock = &self.clock;
        let generate = move |counter: u32| Id::new(origin, clock.now(), counter);
        self.store.put(&generate, &mut record).await?;

        debug!(id = %record.id, url, "generated short link");
        Ok(record.id)
    }

    /// Looks up the full record behind `code`.
    ///
    /// Returns `None` for unknown or malformed codes and on storage failure;
    /// failures are logged but never surfaced.
    pub async fn get(&self, code: &str) -> Option<Record> {
        let id = match parse_valid(code) {
            Ok(id) => id,
            Err(e) => {
                debug!(code, error = %e, "rejecting identifier");
                return None;
            }
        };

        match self.store.get(&id.to_string()).await {
            Ok(record) => record,
            Err(e) => {
                warn!(code, error = %e, "lookup failed");
                None
            }
        }
    }

    /// Returns the target URL behind `code`, or `None` if it cannot be
    /// resolved.
    pub async fn resolve(&self, code: &str) -> Option<String> {
        self.get(code).await.map(|record| record.url)
    }

    /// Visits every record in ascending key order.
    pub async fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Record) -> std::result::Result<(), StoreError> + Send,
    {
        self.store.for_each(&mut |_, record| visit(record)).await?;
        Ok(())
    }

    /// Deletes the records behind `codes`. Unknown codes are ignored.
    ///
    /// Nothing is deleted if any code is malformed or not in canonical form.
    pub async fn delete(&self, codes: &[&str]) -> Result<()> {
        let keys = codes
            .iter()
            .map(|code| parse_valid(code).map(|id| id.to_string()))
            .collect::<Result<Vec<_>>>()?;

        self.store.delete(&keys).await?;
        Ok(())
    }

    /// Writes back a record that already carries an identifier.
    pub async fn update(&self, record: &mut Record) -> Result<()> {
        if !record.id.is_valid() {
            return Err(ShortenerError::MalformedIdentifier(
                "record has no identifier".to_string(),
            ));
        }
        validate_target(&record.url)?;

        let refuse = |_: u32| -> std::result::Result<Id, IdError> {
            Err(IdError::Malformed("update must not mint identifiers".to_string()))
        };
        self.store.put(&refuse, record).await?;
        Ok(())
    }

    /// Deletes every expired record now and returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = reclaimer::purge_expired(self.store.as_ref(), self.clock.now()).await?;
        Ok(purged)
    }

    /// Stops the reclaimer, waits for it to exit, then closes the store.
    pub async fn shutdown(&self) -> Result<()> {
        let reclaimer = self.reclaimer.lock().take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop().await;
        }

        self.store.close().await?;
        Ok(())
    }
}

fn validate_target(url: &str) -> Result<()> {
    Url::parse(url).map_err(|e| ShortenerError::InvalidTarget(format!("{url}: {e}")))?;
    Ok(())
}

/// Parses `code` and requires it to be exactly the text form of a valid id.
/// Leading `a` digits decode to zero, so padded variants are refused.
fn parse_valid(code: &str) -> Result<Id> {
    let id = code.parse::<Id>()?;
    if !id.is_valid() || id.to_string() != code {
        return Err(ShortenerError::MalformedIdentifier(code.to_string()));
    }
    Ok(id)
}
