use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

mod api;
mod cache;
mod compare;
mod config;
mod db;
mod error;
mod join;
mod models;
mod pipeline;
mod queries;
mod report;
mod seed;
mod service;
mod store;
mod window;

use config::{CacheArgs, DatabaseArgs, LogArgs, ServeArgs};
use models::{ApiParams, EntityKind};
use service::AnalyticsService;
use store::{DocumentSource, MemoryStore};

#[derive(Parser)]
#[command(name = "traffic-insights")]
#[command(about = "Per-entity web analytics with period-over-period comparison", long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct EntityArgs {
    #[arg(long, value_enum, default_value_t = EntityKind::Task)]
    kind: EntityKind,
    #[arg(long)]
    id: String,
    /// Window as `start/end`, e.g. 2025-02-01/2025-02-28
    #[arg(long)]
    date_range: String,
    #[arg(long)]
    comparison_date_range: String,
}

impl EntityArgs {
    fn params(&self) -> ApiParams {
        ApiParams {
            id: Some(self.id.clone()),
            date_range: Some(self.date_range.clone()),
            comparison_date_range: Some(self.comparison_date_range.clone()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Load the sample dataset
    Seed {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Import daily page metrics from a CSV file
    Import {
        #[command(flatten)]
        database: DatabaseArgs,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the details of one entity as JSON
    Details {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        entity: EntityArgs,
    },
    /// Generate a markdown report for one entity
    Report {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        entity: EntityArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Run the HTTP API
    Serve {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        cache: CacheArgs,
        #[command(flatten)]
        serve: ServeArgs,
    },
}

async fn postgres_source(database: &DatabaseArgs) -> anyhow::Result<Arc<dyn DocumentSource>> {
    let pool = database.connect().await?;
    Ok(Arc::new(db::PgStore::new(pool)))
}

async fn demo_source() -> anyhow::Result<Arc<dyn DocumentSource>> {
    let store = MemoryStore::new();
    store
        .insert_many(seed::sample_documents())
        .await
        .context("failed to load the sample dataset")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.log.init()?;

    match cli.command {
        Commands::InitDb { database } => {
            let pool = database.connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed { database } => {
            let pool = database.connect().await?;
            let written = db::seed(&pool).await?;
            println!("Seeded {written} documents.");
        }
        Commands::Import { database, csv } => {
            let pool = database.connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} page-metric rows from {}.", csv.display());
        }
        Commands::Details { database, entity } => {
            let service = AnalyticsService::new(postgres_source(&database).await?, Arc::new(cache::NoopCache));
            let details = service
                .entity_details(entity.kind, &entity.params())
                .await
                .with_context(|| format!("failed to load {} {}", entity.kind, entity.id))?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Commands::Report { database, entity, out } => {
            let service = AnalyticsService::new(postgres_source(&database).await?, Arc::new(cache::NoopCache));
            let details = service
                .entity_details(entity.kind, &entity.params())
                .await
                .with_context(|| format!("failed to load {} {}", entity.kind, entity.id))?;
            let report = report::build_report(&details);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { database, cache, serve } => {
            let source = if serve.demo {
                tracing::info!("serving the sample dataset from memory");
                demo_source().await?
            } else {
                postgres_source(&database).await?
            };
            tracing::info!(source = source.name(), cache_capacity = cache.cache_capacity, "starting api");
            let state = api::AppState::new(AnalyticsService::new(source, cache.build()));
            api::serve(serve.bind, state).await?;
        }
    }

    Ok(())
}
