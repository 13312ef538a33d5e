//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::{CacheStore, LruStore, NoopCache, DEFAULT_CACHE_CAPACITY};

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

impl DatabaseArgs {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let database_url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")?;
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")
    }
}

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Entries kept in the in-process cache; 0 disables caching
    #[arg(long, env = "CACHE_CAPACITY", default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: usize,

    /// Seconds an entry stays fresh; 0 keeps entries until evicted
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 0)]
    pub cache_ttl_secs: u64,
}

impl CacheArgs {
    pub fn build(&self) -> Arc<dyn CacheStore> {
        if self.cache_capacity == 0 {
            return Arc::new(NoopCache);
        }
        let ttl = (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs));
        Arc::new(LruStore::new(self.cache_capacity, ttl))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Serve the bundled sample dataset from memory instead of Postgres
    #[arg(long)]
    pub demo: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log filter, e.g. `info` or `traffic_insights=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

impl LogArgs {
    pub fn init(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::try_new(&self.log_level)
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match self.log_format {
            LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        };
        installed.context("failed to install the tracing subscriber")
    }
}
