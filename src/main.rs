//! Mule Detection Engine - Main Entry Point
//!
//! Generates synthetic fixtures, trains the graph model, and scores accounts
//! from the best checkpoint.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mule_detection_engine::{
    config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH},
    feature_extractor::FeatureExtractor,
    graph::{GraphBuilder, NodeSplit},
    metrics::{print_prediction_summary, print_training_summary},
    models::{get_high_risk_accounts, CheckpointStore, Predictor},
    synthetic::{DatasetGenerator, DEFAULT_CHAIN_LENGTH, DEFAULT_NUM_CHAINS, DEFAULT_NUM_NORMAL},
    trainer::Trainer,
    types::{dataset::parse_transfers, Dataset},
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mule-detection-engine", version, about = "Graph-based mule account detection")]
struct Cli {
    /// Configuration file (defaults, then this file, then MULE__* env vars)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a synthetic labelled dataset
    Generate {
        #[arg(long, default_value_t = DEFAULT_NUM_NORMAL)]
        num_normal: usize,
        #[arg(long, default_value_t = DEFAULT_NUM_CHAINS)]
        chains: usize,
        #[arg(long, default_value_t = DEFAULT_CHAIN_LENGTH)]
        chain_length: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Output path; defaults to the configured dataset file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Train on the configured dataset, generating one if it does not exist
    Train,
    /// Score the accounts in a transfer batch
    Predict {
        /// JSON file with a transfer array or `{"transactions": [...]}`
        input: Option<PathBuf>,
        /// Fraud label threshold; defaults to `detection.threshold`
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Only report accounts at or above this risk score
        #[arg(long)]
        min_score: Option<u8>,
    },
    /// Report whether a trained checkpoint is available
    Status,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("mule_detection_engine={}", logging.level).parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from_path(&cli.config)?;
    init_logging(&config.logging)?;

    info!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Command::Generate {
            num_normal,
            chains,
            chain_length,
            seed,
            output,
        } => {
            let path = output.unwrap_or_else(|| config.paths.dataset_path());
            let dataset = DatasetGenerator::new(seed).generate(num_normal, chains, chain_length);
            dataset.save(&path)?;
            info!(path = %path.display(), "Dataset saved");
        }
        Command::Train => train(&config)?,
        Command::Predict {
            input,
            threshold,
            min_score,
        } => predict(&config, input.as_deref(), threshold, min_score)?,
        Command::Status => status(&config)?,
    }

    Ok(())
}

fn load_or_generate(config: &AppConfig) -> Result<Dataset> {
    let path = config.paths.dataset_path();
    if path.exists() {
        let dataset = Dataset::load(&path)
            .with_context(|| format!("Failed to load dataset from {}", path.display()))?;
        info!(
            path = %path.display(),
            transactions = dataset.transactions.len(),
            "Dataset loaded"
        );
        return Ok(dataset);
    }

    warn!(path = %path.display(), "Dataset not found, generating a synthetic one");
    let seed = config.training.seed.unwrap_or(42);
    let dataset = DatasetGenerator::new(seed).generate_default();
    dataset.save(&path)?;
    Ok(dataset)
}

fn train(config: &AppConfig) -> Result<()> {
    let dataset = load_or_generate(config)?;
    let extractor = FeatureExtractor::new();
    info!(
        features = ?extractor.feature_names(),
        "Feature extractor initialized ({} features)",
        extractor.feature_count()
    );

    let mut builder = match config.training.seed {
        Some(seed) => GraphBuilder::seeded(seed),
        None => GraphBuilder::from_entropy(),
    };
    let profiles = dataset.account_profiles(Utc::now());
    let (graph, info) =
        builder.build_graph_with_profiles(&dataset.transactions, Some(&dataset.labels), &profiles)?;
    info!(
        nodes = info.num_nodes,
        edges = info.num_edges,
        fraud = graph.labels.iter().filter(|&&l| l == 1).count(),
        "Graph built"
    );

    let mut split_rng = match config.training.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let split = NodeSplit::random(
        graph.num_nodes(),
        config.training.train_ratio,
        config.training.val_ratio,
        &mut split_rng,
    )?;

    let mut trainer = Trainer::from_config(config)?;
    let (_, report) = trainer.train(&graph, &split)?;
    print_training_summary(&report.history, &report.test);

    match report.best_epoch {
        Some(epoch) => info!(
            epoch = epoch,
            path = %config.paths.checkpoint_path.display(),
            "Best model checkpoint written"
        ),
        None => warn!("No checkpoint written; predictions remain unavailable"),
    }
    Ok(())
}

fn predict(
    config: &AppConfig,
    input: Option<&Path>,
    threshold: Option<f64>,
    min_score: Option<u8>,
) -> Result<()> {
    let path = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.paths.dataset_path());
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read transfers from {}", path.display()))?;
    let transfers = parse_transfers(&raw)?;

    let mut predictor = Predictor::from_config(config)?;
    let threshold = threshold.unwrap_or(config.detection.threshold);

    let predictions = match predictor.predict(&transfers, threshold) {
        Ok(predictions) => predictions,
        Err(e) if e.is_model_not_trained() => {
            warn!(error = %e, "Run `mule-detection-engine train` first");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    print_prediction_summary(&predictions);
    let high_risk = get_high_risk_accounts(&predictions, config.detection.high_risk_min_score);
    info!(
        count = high_risk.len(),
        min_score = config.detection.high_risk_min_score,
        "High-risk accounts"
    );
    let reported = match min_score {
        Some(min_score) => get_high_risk_accounts(&predictions, min_score),
        None => predictions,
    };
    println!("{}", serde_json::to_string_pretty(&reported)?);
    Ok(())
}

fn status(config: &AppConfig) -> Result<()> {
    let store = CheckpointStore::new(&config.paths.checkpoint_path);
    let predictor = Predictor::from_config(config)?;

    let mut report = serde_json::json!({
        "model_loaded": predictor.is_ready(),
        "checkpoint_path": predictor.checkpoint_path().display().to_string(),
    });
    if let Some(checkpoint) = store.load()? {
        report["epoch"] = checkpoint.epoch.into();
        report["best_val_f1"] = checkpoint.best_val_f1.into();
        report["run_id"] = checkpoint.run_id.to_string().into();
        report["saved_at"] = checkpoint.saved_at.to_rfc3339().into();
        report["config"] = serde_json::to_value(&checkpoint.config)?;
    }
    if let Some(model) = predictor.model() {
        report["parameters"] = model.num_parameters().into();
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
