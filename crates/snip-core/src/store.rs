use crate::error::{IdError, Result};
use crate::id::Id;
use crate::record::Record;
use async_trait::async_trait;

/// Mints a fresh identifier from the next sequence counter value.
///
/// Stores call this while holding their write lock or transaction, so it
/// must not call back into the store.
pub type IdGenerator<'a> = &'a (dyn Fn(u32) -> std::result::Result<Id, IdError> + Send + Sync);

/// Receives `(key, record)` pairs during [`Store::for_each`].
/// Returning an error stops the scan and is handed back to the caller.
pub type Visitor<'a> = &'a mut (dyn FnMut(&str, Record) -> Result<()> + Send);

/// Persistent mapping from encoded identifiers to records.
///
/// Keys are always `record.id.to_string()`. Every implementation assigns
/// sequence counters atomically: no two `put` calls on the same store ever
/// see the same counter value.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Retrieves the record stored under `key`.
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Record>>;

    /// Inserts or updates a record.
    ///
    /// If `record.id` is valid the record replaces whatever is stored under
    /// its key. Otherwise the store advances its counter, calls `generate`
    /// with the pre-increment value, assigns the result to `record.id` and
    /// writes the record, all in one atomic step.
    async fn put(&self, generate: IdGenerator<'_>, record: &mut Record) -> Result<()>;

    /// Deletes the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Visits every record in ascending key order.
    async fn for_each(&self, visit: Visitor<'_>) -> Result<()>;

    /// Releases the store. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<()>;
}

/// Runs `generate` for `counter` and assigns the result to `record`.
///
/// Shared by the store implementations so that an identifier without a
/// timestamp can never be written.
pub fn assign_id(generate: IdGenerator<'_>, counter: u32, record: &mut Record) -> Result<()> {
    let id = generate(counter)?;
    if !id.is_valid() {
        return Err(IdError::Malformed(format!("generated identifier {id:?} has no timestamp")).into());
    }
    record.id = id;
    Ok(())
}
