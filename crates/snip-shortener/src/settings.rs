use std::time::Duration;
use typed_builder::TypedBuilder;

/// How often expired records are swept when nothing else is configured.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configures a [`Shortener`](crate::Shortener) instance.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// Embedded in every identifier this shortener mints. Processes sharing
    /// no storage should use different tags.
    pub origin: u32,
    /// Interval between reclamation sweeps. `None` starts no background
    /// worker; expired records then stay until `purge_expired` is called.
    #[builder(default = Some(DEFAULT_RECLAIM_INTERVAL))]
    pub reclaim_interval: Option<Duration>,
    /// The worker gives up after this many failed sweeps in a row.
    #[builder(default = 3)]
    pub max_consecutive_failures: u32,
}
