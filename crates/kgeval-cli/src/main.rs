//! kgeval CLI - Command-line interface
//!
//! Usage:
//!   kgeval evaluate --gold <docs.json> --predictions <preds.json> [--output <report.json>]
//!   kgeval merge --input <passes.json> [--output <merged.json>]
//!   kgeval constraints [--train <train.json>]
//!   kgeval select [--dev <dev.json>] [--num-docs <n>]
//!   kgeval few-shot [--train <train.json>]
//!   kgeval stats

mod report;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use kgeval_core::dataset::{
    build_constraint_table, few_shot_output, load_split, select_dev_docs, select_few_shot,
};
use kgeval_core::{AppConfig, Dataset, ExtractionOutput, LoggingConfig};
use kgeval_eval::{merge_passes, EntityAligner};

use crate::report::{build_report, PredictionSet};

#[derive(Parser)]
#[command(name = "kgeval")]
#[command(about = "Knowledge-graph triple evaluation against JacRED gold annotations")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score predictions against gold documents
    Evaluate {
        /// Gold documents (JacRED split file)
        #[arg(long)]
        gold: PathBuf,
        /// Predictions: [{title, passes: [{entities, relations}]}]
        #[arg(long)]
        predictions: PathBuf,
        /// Write the JSON report here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Merge several extraction passes over one document
    Merge {
        /// Passes: [{entities, relations}]
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Build the domain/range constraint table from training documents
    Constraints {
        /// Defaults to train.json under data.dataset_path
        #[arg(long)]
        train: Option<PathBuf>,
    },
    /// Pick a length-stratified sample of dev documents
    Select {
        /// Defaults to dev.json under data.dataset_path
        #[arg(long)]
        dev: Option<PathBuf>,
        /// Defaults to data.num_docs from the configuration
        #[arg(long)]
        num_docs: Option<usize>,
    },
    /// Show the few-shot demonstration chosen from training documents
    FewShot {
        #[arg(long)]
        train: Option<PathBuf>,
    },
    /// Summarize the dataset under data.dataset_path
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Evaluate {
            gold,
            predictions,
            output,
        } => evaluate(&config, &gold, &predictions, output.as_deref()),
        Commands::Merge { input, output } => merge(&input, output.as_deref()),
        Commands::Constraints { train } => {
            constraints(&split_path(&config, train, "train.json"))
        }
        Commands::Select { dev, num_docs } => select(
            &split_path(&config, dev, "dev.json"),
            num_docs.unwrap_or(config.data.num_docs),
        ),
        Commands::FewShot { train } => few_shot(&config, &split_path(&config, train, "train.json")),
        Commands::Stats => stats(&config),
    }
}

/// Explicit path, or the split file inside the configured dataset directory
fn split_path(config: &AppConfig, explicit: Option<PathBuf>, file: &str) -> PathBuf {
    explicit.unwrap_or_else(|| config.data.dataset_path.join(file))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::from_env().context("loading config from environment")?,
    };
    Ok(config)
}

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn evaluate(
    config: &AppConfig,
    gold: &Path,
    predictions: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let gold = load_split(gold).context("loading gold documents")?;
    let predictions: Vec<PredictionSet> = read_json(predictions)?;
    let aligner =
        EntityAligner::new().with_min_overlap(config.evaluation.min_substring_overlap);

    let report = build_report(&gold, &predictions, &aligner)?;

    for doc in &report.documents {
        println!("{}", doc.summary());
    }
    println!();
    println!("{}", report.aggregate.report());

    if let Some(output) = output {
        write_json(output, &report)?;
        tracing::info!(path = %output.display(), "Report written");
    }
    Ok(())
}

fn merge(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let passes: Vec<ExtractionOutput> = read_json(input)?;
    let (entity_lists, triple_lists): (Vec<_>, Vec<_>) =
        passes.into_iter().map(ExtractionOutput::into_triples).unzip();

    let merged = merge_passes(&entity_lists, &triple_lists)?;
    tracing::info!(
        passes = entity_lists.len(),
        entities = merged.entities.len(),
        triples = merged.triples.len(),
        "Merged passes"
    );

    match output {
        Some(output) => write_json(output, &merged),
        None => {
            println!("{}", serde_json::to_string_pretty(&merged)?);
            Ok(())
        }
    }
}

fn constraints(train: &Path) -> anyhow::Result<()> {
    let train = load_split(train).context("loading training documents")?;
    let table = build_constraint_table(&train)?;
    tracing::info!(relations = table.len(), "Built constraint table");

    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

fn select(dev: &Path, num_docs: usize) -> anyhow::Result<()> {
    let dev = load_split(dev).context("loading dev documents")?;
    let selected = select_dev_docs(&dev, num_docs);

    for doc in &selected {
        println!(
            "{}\t{} chars\t{} entities\t{} labels",
            doc.title,
            doc.char_count(),
            doc.vertex_set.len(),
            doc.labels.len()
        );
    }
    Ok(())
}

fn few_shot(config: &AppConfig, train: &Path) -> anyhow::Result<()> {
    let train = load_split(train).context("loading training documents")?;
    let doc = select_few_shot(&train, &config.data.few_shot)
        .context("no training document has enough labels for a few-shot example")?;
    let output = few_shot_output(&doc)?;

    println!(
        "{} ({} chars, {} entities, {} labels)",
        doc.title,
        doc.char_count(),
        doc.vertex_set.len(),
        doc.labels.len()
    );
    println!("{}", doc.text());
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn stats(config: &AppConfig) -> anyhow::Result<()> {
    let dataset = Dataset::load(&config.data.dataset_path)
        .with_context(|| format!("loading {}", config.data.dataset_path.display()))?;

    for (name, split) in [
        ("train", &dataset.train),
        ("dev", &dataset.dev),
        ("test", &dataset.test),
    ] {
        let labels: usize = split.iter().map(|d| d.labels.len()).sum();
        println!("{name}\t{} documents\t{labels} labels", split.len());
    }
    println!("relations\t{}", dataset.relation_codes().count());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}
