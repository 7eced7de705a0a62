use address_resolver::app::ports::PropertyStorePort;
use address_resolver::batch::{BatchQueueProcessor, ChunkConsumer, SqliteBatchStore};
use address_resolver::config::Config;
use address_resolver::infra::SqlitePropertyStore;
use address_resolver::observability::{init_logging, metrics};
use address_resolver::server::{start_server, AppState};
use address_resolver::tasks::{
    build_pipeline, read_jobs_file, resolve_one, resolve_pending, run_pool, ResolveOneParams,
    ResolvePendingParams,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "address_resolver")]
#[command(about = "Resolve street addresses for property listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one identifier and print the result as JSON
    Resolve {
        identifier: String,
        #[arg(long)]
        outward: Option<String>,
        #[arg(long)]
        inward: Option<String>,
    },
    /// Resolve a file of identifiers through the in-process worker pool
    Pool {
        /// One `identifier[,outward[,inward]]` per line
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Submit a file of identifiers to the durable batch queue
    Enqueue {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Consume queued chunks
    Consume {
        /// Drain what is queued and exit
        #[arg(long)]
        once: bool,
        /// Also write results to the property store
        #[arg(long)]
        save: bool,
    },
    /// Show batch progress
    Status { job_id: String },
    /// Print stored batch results as JSON
    Results { job_id: String },
    /// Resolve unresolved rows from the property store
    Pending {
        #[arg(long, default_value_t = 100)]
        page_size: usize,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load identifiers and postal hints into the property store
    Seed {
        #[arg(long)]
        file: PathBuf,
    },
}

fn batch_processor(config: &Config) -> anyhow::Result<BatchQueueProcessor> {
    let store = SqliteBatchStore::open(config.storage.queue_db())
        .with_context(|| format!("opening {}", config.storage.queue_db().display()))?;
    Ok(BatchQueueProcessor::new(Arc::new(store), config.queue.clone()))
}

fn property_store(config: &Config) -> anyhow::Result<Arc<SqlitePropertyStore>> {
    let store = SqlitePropertyStore::open(config.storage.properties_db())
        .with_context(|| format!("opening {}", config.storage.properties_db().display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Resolve {
            identifier,
            outward,
            inward,
        } => {
            let pipeline = build_pipeline(&config)?;
            let result = resolve_one(
                &pipeline,
                ResolveOneParams {
                    identifier,
                    outward,
                    inward,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Pool { file, workers } => {
            let jobs = read_jobs_file(&file)?;
            let pipeline = Arc::new(build_pipeline(&config)?);
            let report = run_pool(pipeline, workers.unwrap_or(config.pool.workers), jobs).await?;
            for record in &report.results {
                match &record.result.address {
                    Some(address) => println!("{}\t{}", record.identifier, address),
                    None => println!(
                        "{}\t-\t{}",
                        record.identifier,
                        record.result.error_summary().unwrap_or_default()
                    ),
                }
            }
            println!("\n📊 Pool results:");
            println!("   Succeeded: {}", report.succeeded);
            println!("   Failed: {}", report.failed);
            println!("   Total time: {}ms", report.total_elapsed_ms);
            println!("   Average per job: {}ms", report.average_ms);
        }
        Commands::Enqueue { file, chunk_size } => {
            let jobs = read_jobs_file(&file)?;
            let receipt = batch_processor(&config)?.enqueue(jobs, chunk_size).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::Consume { once, save } => {
            let processor = batch_processor(&config)?;
            let pipeline = Arc::new(build_pipeline(&config)?);
            let mut consumer = ChunkConsumer::new(processor.store(), pipeline, config.queue.clone());
            if save {
                let properties: Arc<dyn PropertyStorePort> = property_store(&config)?;
                consumer = consumer.with_property_store(properties);
            }
            if once {
                let chunks = consumer.run_until_idle().await?;
                println!("✅ Processed {} chunk(s)", chunks);
            } else {
                let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutdown requested");
                        let _ = shutdown_tx.send(true);
                    }
                });
                consumer.run_forever(shutdown_rx).await?;
            }
        }
        Commands::Status { job_id } => match batch_processor(&config)?.progress(&job_id).await? {
            Some(progress) => println!("{}", serde_json::to_string_pretty(&progress)?),
            None => anyhow::bail!("batch {} not found", job_id),
        },
        Commands::Results { job_id } => {
            let results = batch_processor(&config)?.results(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Pending { page_size, max } => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            let store: Arc<dyn PropertyStorePort> = property_store(&config)?;
            let summary = resolve_pending(
                pipeline,
                store,
                ResolvePendingParams {
                    page_size,
                    max,
                    workers: config.pool.workers,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve { port } => {
            if let Err(e) = metrics::init() {
                error!("Failed to initialize metrics: {}", e);
            }
            let state = AppState {
                pipeline: Arc::new(build_pipeline(&config)?),
                batches: batch_processor(&config)?,
            };
            start_server(state, port.unwrap_or(config.server.port)).await?;
        }
        Commands::Seed { file } => {
            let jobs = read_jobs_file(&file)?;
            let store = property_store(&config)?;
            for job in &jobs {
                store.upsert_property(&job.identifier, &job.hint)?;
            }
            println!("✅ Seeded {} properties", jobs.len());
        }
    }
    Ok(())
}
