// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use resolve_rs::adk::embedding::embedder_for;
use resolve_rs::adk::model::GenerationConfig;
use resolve_rs::adk::oracle::{ModelOracle, Oracle};
use resolve_rs::adk::registry::ProviderRegistry;
use resolve_rs::adk::tokens::TokenBudgeter;
use resolve_rs::resolve::checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer};
use resolve_rs::resolve::retrieval::{CorpusIndex, FsCorpus, HybridRetriever};
use resolve_rs::resolve::sink::PredictionStore;
use resolve_rs::resolve::{InstanceItem, Settings, WorkflowRunner};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (YAML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve instances and write predictions
    Solve {
        /// JSON array of instances
        #[arg(short, long)]
        instances: PathBuf,

        /// Only solve these instance ids
        #[arg(long, num_args = 1..)]
        ids: Vec<String>,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Print what hybrid retrieval returns for a query
    Retrieve {
        /// Repository checkout to index
        #[arg(short, long)]
        repo: PathBuf,

        /// Problem text to retrieve for
        #[arg(short, long)]
        query: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Send a single prompt to the model
    Prompt {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,
    },
}

fn load_settings(path: Option<&PathBuf>, model: Option<String>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(p) => Settings::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => Settings::default(),
    };
    if let Some(model) = model {
        settings.models.llm_model = model;
    }
    Ok(settings)
}

/// Resolve the model once; `MODEL_PROVIDER` wins over the configured provider
fn build_oracle(settings: &Settings) -> anyhow::Result<Arc<dyn Oracle>> {
    let provider = std::env::var("MODEL_PROVIDER")
        .ok()
        .or_else(|| settings.models.provider.clone());

    let registry = ProviderRegistry::with_defaults();
    let model = registry.resolve(&settings.provider_options(), provider.as_deref())?;
    let config = GenerationConfig {
        temperature: Some(settings.models.temperature),
        ..Default::default()
    };
    Ok(Arc::new(ModelOracle::new(model, config)))
}

async fn load_instances(path: &PathBuf, ids: &[String]) -> anyhow::Result<Vec<InstanceItem>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut instances: Vec<InstanceItem> = serde_json::from_str(&text)?;
    if !ids.is_empty() {
        instances.retain(|i| ids.contains(&i.instance_id));
    }
    Ok(instances)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Solve {
            instances,
            ids,
            model,
        } => {
            let settings = Arc::new(load_settings(args.config.as_ref(), model)?);
            let oracle = build_oracle(&settings)?;
            let budgeter = Arc::new(TokenBudgeter::for_model(&settings.models.llm_model)?);
            let embedder = embedder_for(&settings.models.embeddings_model);
            let corpus = Arc::new(FsCorpus::from_settings(&settings.retrieval));
            let checkpointer: Arc<dyn Checkpointer> = match &settings.evaluation.checkpoint_dir {
                Some(dir) => Arc::new(FileCheckpointer::new(dir.clone())),
                None => Arc::new(MemoryCheckpointer::new()),
            };

            let instances = load_instances(&instances, &ids).await?;
            let store = PredictionStore::load(
                settings.evaluation.predictions_path.clone(),
                settings.models.llm_model.clone(),
            )
            .await?;

            let runner = WorkflowRunner::new(
                settings.clone(),
                oracle,
                budgeter,
                embedder,
                corpus,
                checkpointer,
            );
            let summary = runner.run_all(instances, &store).await?;

            println!(
                "Completed: {}  Skipped: {}  Aborted: {}",
                summary.completed,
                summary.skipped,
                summary.aborted.len()
            );
            for (id, reason) in &summary.aborted {
                println!("  {}: {}", id, reason);
            }
            println!("Predictions: {}", store.path().display());
        }
        Commands::Retrieve { repo, query, top_k } => {
            let settings = load_settings(args.config.as_ref(), None)?;
            let oracle = build_oracle(&settings)?;
            let corpus = Arc::new(FsCorpus::from_settings(&settings.retrieval));
            let embedder = embedder_for(&settings.models.embeddings_model);

            let index = Arc::new(CorpusIndex::build(&repo, corpus, embedder).await?);
            let retriever =
                HybridRetriever::new(index, oracle, settings.retrieval.lexical_candidates);
            let chunks = retriever
                .retrieve(&query, "", top_k.unwrap_or(settings.retrieval.top_k))
                .await;

            for (rank, chunk) in chunks.iter().enumerate() {
                println!("{:>2}. {} (score {:.2})", rank + 1, chunk.source, chunk.score);
            }
        }
        Commands::Prompt { prompt, model } => {
            let settings = load_settings(args.config.as_ref(), model)?;
            let oracle = build_oracle(&settings)?;
            let response = oracle.invoke("You are a helpful assistant.", Some(&prompt)).await?;
            println!("{}", response);
        }
    }

    Ok(())
}
