//! URL shortener facade.
//!
//! Wraps any [`snip_core::Store`] with target validation, identifier
//! generation from a clock and an origin tag, and a background task that
//! reclaims expired records. Storage backends live in `snip_storage`.

pub mod error;
pub mod reclaimer;
pub mod service;
pub mod settings;

pub use error::{Result, ShortenerError};
pub use reclaimer::{purge_expired, Reclaimer};
pub use service::Shortener;
pub use settings::{ShortenerSettings, DEFAULT_RECLAIM_INTERVAL};
pub use snip_core::{Id, Meta, Record};
