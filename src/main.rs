use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use product_ingest::{
    api, config, logging,
    pipeline::{Collaborators, IngestionPipeline},
    report,
    source::{JsonFileSource, RecordSource, SourceQuery},
};
use std::{net::Ipv4Addr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "product-ingest",
    about = "Label, embed, and store product records in Qdrant"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every record of a JSON or JSONL file.
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Inclusive lower bound, `YYYY-MM-DD`.
        #[arg(long)]
        start_date: Option<String>,
        /// Inclusive upper bound, `YYYY-MM-DD`.
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Write the final statistics here; `auto` picks a timestamped name.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Serve `/health` and `/stats` on this port while running.
        #[arg(long)]
        status_port: Option<u16>,
        #[arg(long)]
        max_workers: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Ingest one record by identifier, skipping the duplicate check.
    Single {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = config::init_config().context("invalid configuration")?;

    match cli.command {
        Command::Run {
            input,
            start_date,
            end_date,
            limit,
            report: report_path,
            status_port,
            max_workers,
            batch_size,
        } => {
            let query = SourceQuery {
                start_date: start_date
                    .as_deref()
                    .map(SourceQuery::parse_date)
                    .transpose()?,
                end_date: end_date
                    .as_deref()
                    .map(SourceQuery::parse_date)
                    .transpose()?,
                limit: Some(limit),
            };
            let records = JsonFileSource::new(&input)
                .fetch(&query)
                .await
                .with_context(|| format!("failed to load records from {}", input.display()))?;

            let mut settings = config.pipeline_settings();
            if let Some(workers) = max_workers {
                settings.max_workers = workers.max(1);
            }
            if let Some(size) = batch_size {
                settings.insert_batch_size = size.max(1);
            }

            let collaborators = Collaborators::from_config(config)
                .await
                .context("pipeline startup failed")?;
            let pipeline = IngestionPipeline::new(collaborators, settings);

            if let Some(port) = status_port {
                let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                    .await
                    .with_context(|| format!("failed to bind status port {port}"))?;
                let app = api::create_router(pipeline.stats_handle());
                tracing::info!("Status server listening on http://0.0.0.0:{}", port);
                tokio::spawn(async move {
                    if let Err(err) = axum::serve(listener, app).await {
                        tracing::error!(error = %err, "Status server stopped");
                    }
                });
            }

            let stats = pipeline.run(records).await;

            if let Some(path) = report_path {
                let path = if path.as_os_str() == "auto" {
                    PathBuf::from(report::default_report_name())
                } else {
                    path
                };
                report::save_report(&stats, &path).await?;
            }
        }
        Command::Single { input, id } => {
            let source = JsonFileSource::new(&input);
            let Some(record) = source.find(&id).await? else {
                bail!("record {id} not found in {}", input.display());
            };

            let collaborators = Collaborators::from_config(config)
                .await
                .context("pipeline startup failed")?;
            let pipeline = IngestionPipeline::new(collaborators, config.pipeline_settings());
            let stats = pipeline
                .process_single(record)
                .await
                .with_context(|| format!("failed to process record {id}"))?;
            if stats.inserted == 0 {
                bail!("record {id} was processed but not stored");
            }
            tracing::info!(product_id = %id, "Record stored");
        }
    }

    Ok(())
}
