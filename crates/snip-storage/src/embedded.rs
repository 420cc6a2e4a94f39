use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, Table, TableDefinition};
use snip_core::error::{Result, StoreError};
use snip_core::store::{assign_id, IdGenerator, Store, Visitor};
use snip_core::Record;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Records and the counter share one table.
/// Key: encoded id, Value: record as JSON
const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("snip");

/// Bookkeeping keys start with `_`, which never begins an encoded id.
const RESERVED_PREFIX: char = '_';
const COUNTER_KEY: &str = "_counter_";

/// Single-file, transactional implementation of the [`Store`] trait backed
/// by redb.
///
/// Every write runs in one redb write transaction, which redb serializes, so
/// bumping the counter and writing the record can never interleave with
/// another `put`. Reads use MVCC snapshots and never observe a half-written
/// transaction.
pub struct RedbStore {
    db: RwLock<Option<Arc<Database>>>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("open", &self.db.read().is_some())
            .finish()
    }
}

impl RedbStore {
    /// Creates or opens the database file at `path`.
    ///
    /// The store owns the database: [`Store::close`] releases the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        Self::from_database(Arc::new(db))
    }

    /// Uses a database owned by the caller.
    ///
    /// [`Store::close`] only detaches the store; the file stays open as long
    /// as the caller holds its handle.
    pub fn from_database(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            write_txn
                .open_table(RECORDS_TABLE)
                .map_err(map_redb_error)?;
        }
        write_txn.commit().map_err(map_redb_error)?;

        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    fn database(&self) -> Result<Arc<Database>> {
        self.db.read().clone().ok_or(StoreError::Closed)
    }
}

fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Reads the counter, stores its successor and returns the old value.
fn next_counter(table: &mut Table<'_, &'static str, &'static [u8]>) -> Result<u32> {
    let current = match table.get(COUNTER_KEY).map_err(map_redb_error)? {
        Some(value) => {
            let bytes: [u8; 4] = value.value().try_into().map_err(|_| {
                StoreError::Serialization(format!(
                    "counter value has {} bytes, expected 4",
                    value.value().len()
                ))
            })?;
            u32::from_be_bytes(bytes)
        }
        None => 0,
    };

    let next = current.wrapping_add(1).to_be_bytes();
    table
        .insert(COUNTER_KEY, next.as_slice())
        .map_err(map_redb_error)?;
    Ok(current)
}

fn decode_record(key: &str, bytes: &[u8]) -> Result<Record> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Serialization(format!("failed to decode record {key:?}: {e}")))
}

#[async_trait]
impl Store for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        if is_reserved(key) {
            return Ok(None);
        }

        let db = self.database()?;
        let read_txn = db.begin_read().map_err(map_redb_error)?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(map_redb_error)?;

        let result = match table.get(key).map_err(map_redb_error)? {
            Some(value) => Some(decode_record(key, value.value())?),
            None => None,
        };

        Ok(result)
    }

    async fn put(&self, generate: IdGenerator<'_>, record: &mut Record) -> Result<()> {
        let db = self.database()?;
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(map_redb_error)?;

            // An error before commit drops the transaction, which rolls the
            // counter back too.
            if !record.id.is_valid() {
                let counter = next_counter(&mut table)?;
                assign_id(generate, counter, record)?;
            }

            let key = record.id.to_string();
            let value = serde_json::to_vec(record)?;
            trace!(key = %key, "storing record in redb");
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_redb_error)?;
        }
        write_txn.commit().map_err(map_redb_error)?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let db = self.database()?;
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(map_redb_error)?;
            for key in keys.iter().filter(|key| !is_reserved(key)) {
                table.remove(key.as_str()).map_err(map_redb_error)?;
            }
        }
        write_txn.commit().map_err(map_redb_error)?;

        debug!(count = keys.len(), "deleted records from redb");
        Ok(())
    }

    async fn for_each(&self, visit: Visitor<'_>) -> Result<()> {
        let db = self.database()?;
        let read_txn = db.begin_read().map_err(map_redb_error)?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(map_redb_error)?;

        for item in table.iter().map_err(map_redb_error)? {
            let (key, value) = item.map_err(map_redb_error)?;
            let key = key.value();
            if is_reserved(key) {
                continue;
            }
            visit(key, decode_record(key, value.value())?)?;
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let db = self.db.write().take().ok_or(StoreError::Closed)?;
        info!(shared = Arc::strong_count(&db) > 1, "closing redb store");
        Ok(())
    }
}

/// Creates the parent directory if needed and opens the database file.
pub(crate) fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Unavailable(format!(
                "failed to create directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    Database::create(path).map_err(map_redb_error)
}

pub(crate) fn map_redb_error(err: impl Into<redb::Error>) -> StoreError {
    let err = err.into();
    let message = err.to_string();

    match err {
        redb::Error::Io(_) | redb::Error::DatabaseAlreadyOpen | redb::Error::Corrupted(_) => {
            StoreError::Unavailable(message)
        }
        _ => StoreError::Operation(message),
    }
}
