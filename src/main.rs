//! Command-line entrypoint: ingest a directory, ask for a grounded summary, manage collections.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragline::config::{self, Config};
use ragline::embedding::HttpEmbeddingClient;
use ragline::generation::HttpGenerationClient;
use ragline::index::{QdrantIndex, VectorIndex};
use ragline::logging;
use ragline::metrics::IngestionMetrics;
use ragline::pipeline::{
    EmptyStage, IngestionOutcome, IngestionPipeline, SummaryOutcome, SummaryPipeline,
};
use ragline::processing::Segmenter;
use ragline::retrieval::Retriever;
use ragline::sources::DirectorySource;
use ragline::tokenizer::Tokenizer;

#[derive(Parser)]
#[command(
    name = "ragline",
    version,
    about = "Ingest documents into a vector index and summarize against them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load, segment, embed, and store every .txt/.md/.pdf file in a directory.
    Ingest {
        dir: PathBuf,
        /// Target collection (display or backing name).
        #[arg(long)]
        collection: Option<String>,
    },
    /// Retrieve context from all collections and generate a summary.
    Ask {
        query: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Inspect or drop collections.
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },
    /// Remove one document's chunks from a collection.
    Forget {
        source: String,
        #[arg(long)]
        collection: Option<String>,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    List,
    Delete { name: String },
}

struct Services {
    index: Arc<QdrantIndex>,
    embedder: Arc<HttpEmbeddingClient>,
}

impl Services {
    fn connect(config: &Config) -> Result<Self> {
        let index = QdrantIndex::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.request_timeout,
            config.qdrant_metadata_updates,
        )
        .context("failed to build Qdrant client")?;
        let embedder = HttpEmbeddingClient::new(&config.embedding_url, config.request_timeout)
            .context("failed to build embedding client")?;
        Ok(Self {
            index: Arc::new(index),
            embedder: Arc::new(embedder),
        })
    }

    fn ingestion(&self, config: &Config) -> Result<IngestionPipeline> {
        let tokenizer = Tokenizer::from_name(&config.tokenizer_encoding)
            .context("failed to load tokenizer")?;
        let segmenter =
            Segmenter::new(tokenizer, config.segment).context("invalid chunking options")?;
        Ok(IngestionPipeline::new(
            segmenter,
            self.index.clone(),
            self.embedder.clone(),
            config.batch,
            config.retry.clone(),
            Arc::new(IngestionMetrics::new()),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::init_config().context("failed to load configuration")?;
    let services = Services::connect(config)?;

    match cli.command {
        Command::Ingest { dir, collection } => {
            let collection = target_collection(config, collection.as_deref());
            let pipeline = services.ingestion(config)?;
            let report = pipeline
                .ingest(&DirectorySource::new(dir), &collection)
                .await
                .context("ingestion failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!(
                "{}",
                serde_json::to_string_pretty(&pipeline.metrics().snapshot())?
            );
            match report.outcome {
                IngestionOutcome::Completed => println!("Stored {} chunks.", report.stored),
                IngestionOutcome::Partial => println!(
                    "Stored {} chunks; {} chunks could not be stored.",
                    report.stored, report.failed_chunks
                ),
                IngestionOutcome::Empty(stage) => {
                    let reason = match stage {
                        EmptyStage::NoDocuments => "no documents found",
                        EmptyStage::NoChunks => "documents contained no text",
                        EmptyStage::NoEmbeddings => "embedding failed for every batch",
                        EmptyStage::NoStorage => "the index rejected every batch",
                    };
                    println!("Nothing was stored: {reason}.");
                }
            }
        }
        Command::Ask {
            query,
            notes,
            top_n,
        } => {
            let generator =
                HttpGenerationClient::new(&config.generation_url, config.request_timeout)
                    .context("failed to build generation client")?;
            let retriever = Retriever::new(
                services.index.clone(),
                services.embedder.clone(),
                config.retrieval,
                config.retry.clone(),
            );
            let pipeline = SummaryPipeline::new(
                retriever,
                Arc::new(generator),
                config.generation_instructions.clone(),
                config.generation,
                top_n.unwrap_or(config.top_n),
                config.retry.clone(),
            );
            match pipeline.summarize(&query, notes.as_deref()).await? {
                SummaryOutcome::Generated { text, context } => {
                    println!("{text}");
                    println!();
                    for chunk in &context {
                        let source = chunk
                            .metadata
                            .get("source")
                            .and_then(|value| value.as_str())
                            .unwrap_or("unknown");
                        println!(
                            "[{:.3}] {} / {}",
                            chunk.distance,
                            config.collections.display_name(&chunk.collection),
                            source
                        );
                    }
                }
                SummaryOutcome::Unavailable(reason) => {
                    println!("No summary available: {reason}.");
                }
            }
        }
        Command::Collections { action } => match action {
            CollectionsAction::List => {
                let names = services
                    .index
                    .list_collections()
                    .await
                    .context("failed to list collections")?;
                for name in names {
                    let display = config.collections.display_name(&name);
                    if display == name {
                        println!("{name}");
                    } else {
                        println!("{display} ({name})");
                    }
                }
            }
            CollectionsAction::Delete { name } => {
                let backing = config.collections.resolve(&name).to_string();
                services
                    .ingestion(config)?
                    .drop_collection(&backing)
                    .await?;
                println!("Deleted collection {backing}.");
            }
        },
        Command::Forget { source, collection } => {
            let collection = target_collection(config, collection.as_deref());
            services
                .ingestion(config)?
                .forget(&collection, &source)
                .await?;
            println!("Removed {source} from {collection}.");
        }
    }

    Ok(())
}

fn target_collection(config: &Config, requested: Option<&str>) -> String {
    match requested {
        Some(name) => config.collections.resolve(name).to_string(),
        None => config.ingest_collection.clone(),
    }
}
