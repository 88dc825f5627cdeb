//! enrich-custom-fields: run story custom field enrichment for one scope.
//!
//! Reads config from env vars (a `.env` file is honoured):
//!   DATABASE_URL            Postgres connection string
//!   DATABASE_POOL_SIZE      pool size (default: 10)
//!   ENRICHER_BATCH_SIZE     records per bulk insert (default: 500)
//!   ENRICHER_SCHEMA, ENRICHER_*_TABLE  table overrides
//!
//! Ctrl-C cancels at the next definition boundary and rolls back.

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use custom_field_enricher::{database, postgres, EnricherConfig, Scope, ENRICH_STORY_CUSTOM_FIELDS};

#[derive(Parser, Debug)]
#[command(name = "enrich-custom-fields")]
#[command(about = "Expand custom field definitions into per-story values for one scope")]
struct Args {
    /// Connection the scope belongs to
    #[arg(long)]
    connection_id: u64,

    /// Workspace within the connection
    #[arg(long)]
    workspace_id: u64,

    /// Records per bulk insert (overrides ENRICHER_BATCH_SIZE)
    #[arg(long, short = 'b')]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,custom_field_enricher=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = EnricherConfig::from_env().context("invalid configuration")?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    let pool = database::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            let _ = shutdown_tx.send(true);
        }
    });

    let converter = postgres::converter(pool.clone(), &config)?.with_shutdown(shutdown_rx);
    let scope = Scope::new(args.connection_id, args.workspace_id);

    let result = converter.run(scope).await;
    pool.close().await;

    match result {
        Ok(summary) => {
            tracing::info!(
                subtask = ENRICH_STORY_CUSTOM_FIELDS.name,
                definitions = summary.definitions,
                records = summary.records_written,
                "Enrichment finished"
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(
            "{} failed for scope {} ({}): {}",
            ENRICH_STORY_CUSTOM_FIELDS.name,
            scope,
            e.kind(),
            e
        )),
    }
}
