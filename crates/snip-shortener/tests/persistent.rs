//! The facade over the on-disk backends.

use snip_shortener::{Shortener, ShortenerSettings};
use snip_storage::{EncryptionKey, RedbStore, SealedStore};
use std::time::Duration;

fn settings(origin: u32) -> ShortenerSettings {
    ShortenerSettings::builder()
        .origin(origin)
        .reclaim_interval(None)
        .build()
}

#[tokio::test]
async fn links_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snip.redb");

    let shortener = Shortener::new(RedbStore::open(&path).unwrap(), settings(3));
    let first = shortener.generate("https://example.com/one").await.unwrap();
    shortener.shutdown().await.unwrap();

    let shortener = Shortener::new(RedbStore::open(&path).unwrap(), settings(3));
    assert_eq!(
        shortener.resolve(&first.to_string()).await.as_deref(),
        Some("https://example.com/one")
    );

    let second = shortener.generate("https://example.com/two").await.unwrap();
    assert_eq!(second.counter(), first.counter() + 1);
    shortener.shutdown().await.unwrap();
}

#[tokio::test]
async fn sealed_store_needs_the_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sealed.redb");
    let key = EncryptionKey::generate();
    let raw = *key.as_bytes();

    let shortener = Shortener::new(SealedStore::open(&path, Some(key)).unwrap(), settings(9));
    let id = shortener
        .generate_timed("https://example.com/secret", Duration::from_secs(3600))
        .await
        .unwrap();
    shortener.shutdown().await.unwrap();

    let same = EncryptionKey::from_bytes(&raw).unwrap();
    let shortener = Shortener::new(SealedStore::open(&path, Some(same)).unwrap(), settings(9));
    assert_eq!(
        shortener.resolve(&id.to_string()).await.as_deref(),
        Some("https://example.com/secret")
    );
    shortener.shutdown().await.unwrap();

    let other = EncryptionKey::generate();
    let shortener = Shortener::new(SealedStore::open(&path, Some(other)).unwrap(), settings(9));
    assert_eq!(shortener.resolve(&id.to_string()).await, None);
    shortener.shutdown().await.unwrap();
}
