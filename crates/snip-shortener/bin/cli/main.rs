mod cli;

use crate::cli::{Command, StorageBackendArg, CLI};
use anyhow::{bail, Context};
use clap::Parser;
use snip_core::{Meta, Store};
use snip_shortener::{Shortener, ShortenerSettings};
use snip_storage::{EncryptionKey, RedbStore, SealedStore};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = CLI::try_parse()?;
    if let Command::Keygen = config.command {
        print_key();
        return Ok(());
    }

    info!(
        storage_backend = %config.storage,
        path = %config.path.display(),
        origin = config.origin,
        "opening store"
    );

    // one-shot commands never need the background reclaimer
    let settings = ShortenerSettings::builder()
        .origin(config.origin)
        .reclaim_interval(None)
        .build();

    match config.storage {
        StorageBackendArg::Redb => {
            let store = RedbStore::open(&config.path).context("failed to open redb store")?;
            run(Shortener::new(store, settings), config.command).await
        }
        StorageBackendArg::Sealed => {
            let key = config.key.as_deref().map(decode_key).transpose()?;
            let store = SealedStore::open(&config.path, key).context("failed to open sealed store")?;
            run(Shortener::new(store, settings), config.command).await
        }
    }
}

async fn run<S: Store>(shortener: Shortener<S>, command: Command) -> anyhow::Result<()> {
    let outcome = execute(&shortener, command).await;
    shortener.shutdown().await?;
    outcome
}

async fn execute<S: Store>(shortener: &Shortener<S>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url, ttl, meta } => {
            let ttl = ttl
                .map(|ttl| Duration::try_from(ttl).context("ttl must not be negative"))
                .transpose()?;
            let meta: Meta = meta
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let id = shortener.generate_with(&url, ttl, meta).await?;
            println!("{id}");
        }
        Command::Resolve { id } => match shortener.resolve(&id).await {
            Some(url) => println!("{url}"),
            None => bail!("no record for `{id}`"),
        },
        Command::List => {
            shortener
                .for_each(|record| {
                    println!("{}", serde_json::to_string(&record)?);
                    Ok(())
                })
                .await?;
        }
        Command::Purge => {
            let purged = shortener.purge_expired().await?;
            println!("{purged}");
        }
        Command::Delete { ids } => {
            let codes: Vec<&str> = ids.iter().map(String::as_str).collect();
            shortener.delete(&codes).await?;
        }
        Command::Keygen => print_key(),
    }

    Ok(())
}

fn print_key() {
    let key = EncryptionKey::generate();
    println!("{}", bs58::encode(key.as_bytes()).into_string());
}

fn decode_key(encoded: &str) -> anyhow::Result<EncryptionKey> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .context("encryption key is not valid base58")?;
    Ok(EncryptionKey::from_bytes(&bytes)?)
}
