use clap::{Parser, Subcommand, ValueEnum};
use jiff::SignedDuration;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const STORAGE_PATH_ENV: &str = "SNIP_STORAGE_PATH";
pub const ORIGIN_ENV: &str = "SNIP_ORIGIN";
pub const ENCRYPTION_KEY_ENV: &str = "SNIP_ENCRYPTION_KEY";

pub const DEFAULT_STORAGE_PATH: &str = "snip.redb";
pub const DEFAULT_ORIGIN: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "redb")]
    Redb,
    #[value(name = "sealed")]
    Sealed,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Redb => write!(f, "redb"),
            StorageBackendArg::Sealed => write!(f, "sealed"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten and resolve URLs against a local store")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::Redb
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = STORAGE_PATH_ENV, default_value = DEFAULT_STORAGE_PATH)]
    pub path: PathBuf,

    #[arg(long, env = ORIGIN_ENV, default_value_t = DEFAULT_ORIGIN)]
    pub origin: u32,

    /// Base58-encoded 32-byte key; only used by the sealed backend.
    #[arg(long, env = ENCRYPTION_KEY_ENV, hide_env_values = true)]
    pub key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a URL and print its short identifier.
    Shorten {
        url: String,
        /// Lifetime such as `90s`, `2h` or `PT1H`.
        #[arg(long)]
        ttl: Option<SignedDuration>,
        /// Extra `key=value` pairs stored with the record.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Print the URL behind an identifier.
    Resolve { id: String },
    /// Print every stored record as JSON lines.
    List,
    /// Delete expired records now.
    Purge,
    /// Delete records by identifier.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print a fresh base58 encryption key for the sealed backend.
    Keygen,
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}
