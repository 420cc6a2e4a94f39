//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the identifier codec, the stored record type and the
//! storage capability set shared by every backend and by the shortener facade.

pub mod clock;
pub mod error;
pub mod id;
pub mod record;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{IdError, StoreError};
pub use id::Id;
pub use record::{Meta, Record};
pub use store::{assign_id, IdGenerator, Store, Visitor};
