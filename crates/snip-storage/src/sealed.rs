use crate::cipher::{Cipher, CipherError, EncryptionKey};
use crate::embedded::{map_redb_error, open_database};
use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use snip_core::error::{Result, StoreError};
use snip_core::store::{assign_id, IdGenerator, Store, Visitor};
use snip_core::Record;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Key: encoded id, Value: record as JSON, sealed when a key is configured
const IDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ids");
/// Holds a single entry under [`COUNTER_KEY`].
const COUNTER_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counter");
const COUNTER_KEY: &str = "cnt";

/// Transactional implementation of the [`Store`] trait with optional
/// at-rest encryption of record values.
///
/// Unlike [`RedbStore`](crate::RedbStore) the counter lives in its own table,
/// so the record table only ever holds records. Encryption happens inside
/// the transaction: the file never sees a plaintext value when a key is set.
/// Keys stay in the clear so lookups and ordered scans keep working.
pub struct SealedStore {
    db: RwLock<Option<Arc<Database>>>,
    cipher: Option<Cipher>,
}

impl std::fmt::Debug for SealedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedStore")
            .field("open", &self.db.read().is_some())
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

impl SealedStore {
    /// Creates or opens the database file at `path`.
    ///
    /// With `key` set, every record value is sealed with AES-256-GCM. A file
    /// written with one key can only be read back with the same key.
    pub fn open(path: impl AsRef<Path>, key: Option<EncryptionKey>) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        Self::from_database(Arc::new(db), key)
    }

    pub fn from_database(db: Arc<Database>, key: Option<EncryptionKey>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            write_txn.open_table(IDS_TABLE).map_err(map_redb_error)?;
            write_txn.open_table(COUNTER_TABLE).map_err(map_redb_error)?;
        }
        write_txn.commit().map_err(map_redb_error)?;

        Ok(Self {
            db: RwLock::new(Some(db)),
            cipher: key.as_ref().map(Cipher::new),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn database(&self) -> Result<Arc<Database>> {
        self.db.read().clone().ok_or(StoreError::Closed)
    }

    fn encode(&self, key: &str, record: &Record) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(record)?;
        match &self.cipher {
            Some(cipher) => cipher
                .seal(&json, key.as_bytes())
                .map_err(|e| cipher_error(key, e)),
            None => Ok(json),
        }
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<Record> {
        let json = match &self.cipher {
            Some(cipher) => cipher
                .open(bytes, key.as_bytes())
                .map_err(|e| cipher_error(key, e))?,
            None => bytes.to_vec(),
        };
        serde_json::from_slice(&json)
            .map_err(|e| StoreError::Serialization(format!("failed to decode record {key:?}: {e}")))
    }
}

fn cipher_error(key: &str, err: CipherError) -> StoreError {
    StoreError::Serialization(format!("record {key:?}: {err}"))
}

#[async_trait]
impl Store for SealedStore {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let db = self.database()?;
        let read_txn = db.begin_read().map_err(map_redb_error)?;
        let table = read_txn.open_table(IDS_TABLE).map_err(map_redb_error)?;

        let result = match table.get(key).map_err(map_redb_error)? {
            Some(value) => Some(self.decode(key, value.value())?),
            None => None,
        };

        Ok(result)
    }

    async fn put(&self, generate: IdGenerator<'_>, record: &mut Record) -> Result<()> {
        let db = self.database()?;
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            if !record.id.is_valid() {
                let mut counter = write_txn
                    .open_table(COUNTER_TABLE)
                    .map_err(map_redb_error)?;
                let current = counter
                    .get(COUNTER_KEY)
                    .map_err(map_redb_error)?
                    .map(|value| value.value())
                    .unwrap_or(0);
                // the stored value is kept in u32 range so it wraps with the id field
                let current = (current & u64::from(u32::MAX)) as u32;
                counter
                    .insert(COUNTER_KEY, u64::from(current.wrapping_add(1)))
                    .map_err(map_redb_error)?;
                assign_id(generate, current, record)?;
            }

            let key = record.id.to_string();
            let value = self.encode(&key, record)?;
            trace!(key = %key, encrypted = self.is_encrypted(), "storing sealed record");
            let mut ids = write_txn.open_table(IDS_TABLE).map_err(map_redb_error)?;
            ids.insert(key.as_str(), value.as_slice())
                .map_err(map_redb_error)?;
        }
        write_txn.commit().map_err(map_redb_error)?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let db = self.database()?;
        let write_txn = db.begin_write().map_err(map_redb_error)?;
        {
            let mut ids = write_txn.open_table(IDS_TABLE).map_err(map_redb_error)?;
            for key in keys {
                ids.remove(key.as_str()).map_err(map_redb_error)?;
            }
        }
        write_txn.commit().map_err(map_redb_error)?;

        debug!(count = keys.len(), "deleted sealed records");
        Ok(())
    }

    async fn for_each(&self, visit: Visitor<'_>) -> Result<()> {
        let db = self.database()?;
        let read_txn = db.begin_read().map_err(map_redb_error)?;
        let table = read_txn.open_table(IDS_TABLE).map_err(map_redb_error)?;

        for item in table.iter().map_err(map_redb_error)? {
            let (key, value) = item.map_err(map_redb_error)?;
            let key = key.value();
            visit(key, self.decode(key, value.value())?)?;
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let db = self.db.write().take().ok_or(StoreError::Closed)?;
        info!(shared = Arc::strong_count(&db) > 1, "closing sealed store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::{Id, IdError};

    fn generator(counter: u32) -> std::result::Result<Id, IdError> {
        Ok(Id::from_parts(100, 7, counter))
    }

    #[tokio::test]
    async fn values_are_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed.redb");
        let key = EncryptionKey::generate();

        let mut record = Record::new("https://example.com/very-secret-target");
        {
            let store = SealedStore::open(&path, Some(key.clone())).unwrap();
            assert!(store.is_encrypted());
            store.put(&generator, &mut record).await.unwrap();
            store.close().await.unwrap();
        }

        // the raw value is not readable JSON
        let db = Arc::new(Database::open(&path).unwrap());
        {
            let read_txn = db.begin_read().unwrap();
            let table = read_txn.open_table(IDS_TABLE).unwrap();
            let raw = table.get(record.id.to_string().as_str()).unwrap().unwrap();
            assert!(serde_json::from_slice::<Record>(raw.value()).is_err());
        }

        // the right key opens it
        let store = SealedStore::from_database(Arc::clone(&db), Some(key)).unwrap();
        let found = store.get(&record.id.to_string()).await.unwrap();
        assert_eq!(found, Some(record.clone()));
        store.close().await.unwrap();

        // a different key does not
        let store = SealedStore::from_database(db, Some(EncryptionKey::generate())).unwrap();
        let err = store.get(&record.id.to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn counter_lives_in_its_own_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed.redb");

        {
            let store = SealedStore::open(&path, None).unwrap();
            for i in 0..2 {
                let mut record = Record::new(format!("https://example.com/{i}"));
                store.put(&generator, &mut record).await.unwrap();
            }
            store.close().await.unwrap();
        }

        let db = Database::open(&path).unwrap();
        let read_txn = db.begin_read().unwrap();
        let counter = read_txn.open_table(COUNTER_TABLE).unwrap();
        assert_eq!(counter.get(COUNTER_KEY).unwrap().unwrap().value(), 2);
        let ids = read_txn.open_table(IDS_TABLE).unwrap();
        assert_eq!(ids.iter().unwrap().count(), 2);
    }

    #[tokio::test]
    async fn failed_generation_rolls_back_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = SealedStore::open(dir.path().join("sealed.redb"), None).unwrap();

        let mut record = Record::new("https://example.com");
        assert!(store
            .put(&|_| Err(IdError::OutOfRange { second: 0 }), &mut record)
            .await
            .is_err());

        store.put(&generator, &mut record).await.unwrap();
        assert_eq!(record.id.counter(), 0);
    }
}
