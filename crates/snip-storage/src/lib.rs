//! Storage backends for the snip URL shortener.
//!
//! Three interchangeable implementations of [`snip_core::Store`]:
//! - [`InMemoryStore`]: volatile, guarded by one reader/writer lock
//! - [`RedbStore`]: a single redb file holding records and the counter
//! - [`SealedStore`]: redb with a separate counter table and optional
//!   AES-256-GCM encryption of record values

pub mod cipher;
pub mod embedded;
pub mod memory;
pub mod sealed;

pub use cipher::{CipherError, EncryptionKey};
pub use embedded::RedbStore;
pub use memory::InMemoryStore;
pub use sealed::SealedStore;
pub use snip_core::{Store, StoreError};
