use clap::{Parser, Subcommand};
use tracing::{error, info};

use verte_lake::analytics;
use verte_lake::config::PipelineConfig;
use verte_lake::gold;
use verte_lake::ingest::{DpeIngestor, DvfIngestor};
use verte_lake::logging;
use verte_lake::store::LakeStore;
use verte_lake::transform;
use verte_lake::verify;
use verte_lake::Result;

#[derive(Parser)]
#[command(name = "verte-lake")]
#[command(about = "Bronze/Silver/Gold pipeline for DVF and DPE market indicators")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Paginate the DPE API into the Bronze bucket
    IngestDpe {
        /// Cap the number of pages per department (smoke runs)
        #[arg(long)]
        max_batches: Option<u32>,
    },
    /// Upload local DVF text files into the Bronze bucket
    IngestDvf {
        /// Override the configured source directory
        #[arg(long)]
        source_dir: Option<String>,
    },
    /// Rebuild the Silver datasets from Bronze
    Silver,
    /// Rebuild the Gold indicators from Silver
    Gold,
    /// Run the reporting analytics over Silver and Gold
    Analytics,
    /// Re-check the Gold invariants
    Verify,
    /// Rebuild Silver and Gold, then verify
    Run,
}

async fn ingest_dpe(store: &LakeStore, config: &PipelineConfig, max_batches: Option<u32>) -> Result<()> {
    println!("🏠 Ingesting DPE pages for departments: {}", config.departements.join(", "));
    let ingestor = DpeIngestor::new(store, config)?;
    let report = ingestor.ingest_all(max_batches).await?;
    println!("\n📊 DPE ingestion results:");
    println!("   Records: {}", report.total_records);
    println!("   Batches: {}", report.total_batches);
    if !report.failed_departements.is_empty() {
        println!("   ⚠️  Failed departments: {}", report.failed_departements.join(", "));
    }
    Ok(())
}

async fn ingest_dvf(store: &LakeStore, config: &PipelineConfig) -> Result<()> {
    println!("🗂️  Uploading DVF files from {}", config.dvf.source_dir);
    let ingestor = DvfIngestor::new(store, config);
    let report = ingestor.ingest_all().await?;
    println!("\n📊 DVF ingestion results:");
    println!("   Uploaded: {}", report.uploaded);
    println!("   Failed: {}", report.failed);
    Ok(())
}

async fn run_stage(store: &LakeStore, config: &PipelineConfig, command: Commands) -> Result<()> {
    match command {
        Commands::IngestDpe { max_batches } => ingest_dpe(store, config, max_batches).await,
        Commands::IngestDvf { .. } => ingest_dvf(store, config).await,
        Commands::Silver => {
            println!("🧹 Rebuilding Silver from Bronze");
            transform::run_silver(store, config).await
        }
        Commands::Gold => {
            println!("🥇 Rebuilding Gold from Silver");
            gold::run_gold(store, config).await
        }
        Commands::Analytics => {
            println!("📈 Running reporting analytics");
            analytics::run_analytics(store, config).await
        }
        Commands::Verify => verify::run_verify(store, config).await,
        Commands::Run => {
            println!("🧹 Rebuilding Silver from Bronze");
            transform::run_silver(store, config).await?;
            println!("🥇 Rebuilding Gold from Silver");
            gold::run_gold(store, config).await?;
            verify::run_verify(store, config).await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    logging::init_logging();

    let mut config = PipelineConfig::load()?;
    if let Commands::IngestDvf {
        source_dir: Some(dir),
    } = &cli.command
    {
        config.dvf.source_dir = dir.clone();
    }

    info!(endpoint = config.store.endpoint.as_str(), "connecting to object store");
    let store = LakeStore::connect(&config.store).await;

    // Each stage catches and logs at its own boundary; nothing propagates
    // across stages.
    if let Err(e) = run_stage(&store, &config, cli.command).await {
        error!(error = %e, "stage failed");
        eprintln!("❌ Stage failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}
