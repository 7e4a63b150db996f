//! Modelmux CLI - adaptive multi-provider model routing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use modelmux_core::config::{Config, api_key_env, resolved_api_key};
use modelmux_core::providers::{EmbeddingInput, ProviderSet, TaskOutput, TaskPayload};
use modelmux_core::routing::{
    EvaluationRecord, MetricWeights, MetricsStore, ModelIdentifier, ModelPerformance,
    ModelRegistry, ModelRouter, PerformanceMetrics, Provider, ProviderSettings, RegistryConfig,
    RegistryConfigUpdate, RouteOptions, RouterConfig, SelectionOptions, SqliteMetricsStore,
    TaskCounter, TaskType,
};
use modelmux_core::storage::Database;
use serde::Serialize;
use tracing::{debug, warn};

#[cfg(test)]
mod main_tests;

#[derive(Parser)]
#[command(name = "modelmux")]
#[command(author, version, about = "Adaptive multi-provider model router", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args, Debug, Clone)]
struct SelectionArgs {
    /// Prefer models from this provider
    #[arg(long)]
    prefer: Option<Provider>,
    /// Reject models whose average latency exceeds this (ms)
    #[arg(long)]
    max_latency: Option<f64>,
    /// Reject models whose average accuracy is below this
    #[arg(long)]
    min_accuracy: Option<f64>,
    /// Penalize expensive models more strongly
    #[arg(long)]
    cost_sensitive: bool,
}

impl SelectionArgs {
    fn to_options(&self) -> SelectionOptions {
        let mut options = SelectionOptions::new().with_cost_sensitive(self.cost_sensitive);
        if let Some(provider) = self.prefer {
            options = options.with_preferred_provider(provider);
        }
        if let Some(max) = self.max_latency {
            options = options.with_max_latency(max);
        }
        if let Some(min) = self.min_accuracy {
            options = options.with_min_accuracy(min);
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Route one task to the best model
    Route {
        /// Task type (text-generation, embedding, image-analysis, ...)
        task_type: String,
        /// Prompt or embedding input
        input: Option<String>,
        /// Image file to analyze instead of a text input
        #[arg(long)]
        image: Option<PathBuf>,
        /// Maximum output length in tokens
        #[arg(long)]
        max_length: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
        /// Normalize embedding vectors
        #[arg(long)]
        normalize: bool,
        /// Run against every candidate regardless of rotation
        #[arg(long)]
        evaluate: bool,
        /// Per-call deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Show which model would be selected, without executing anything
    Select {
        task_type: String,
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// List candidate models for a task type
    Models { task_type: String },

    /// Show per-model performance and rotation state
    Stats { task_type: String },

    /// Show recent evaluation reports
    Reports {
        task_type: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Record user feedback for a model
    Feedback {
        /// Model as provider:model
        model: ModelIdentifier,
        task_type: String,
        /// User rating (0.0 - 1.0)
        #[arg(long)]
        rating: Option<f64>,
        /// Measured accuracy (0.0 - 1.0)
        #[arg(long)]
        accuracy: Option<f64>,
    },

    /// Registry configuration
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Show the registry configuration
    Show,
    /// Set rotation cycle lengths
    SetCycles { standard: u32, evaluation: u32 },
    /// Set scoring weights
    Weights {
        accuracy: f64,
        latency: f64,
        cost: f64,
    },
    /// Enable a provider
    Enable { provider: Provider },
    /// Disable a provider
    Disable { provider: Provider },
    /// Set a provider's default model for a task type
    SetDefault {
        provider: Provider,
        task_type: String,
        model: String,
    },
    /// Add an additional candidate model
    AddModel {
        provider: Provider,
        task_type: String,
        model: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("modelmux=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Route {
            task_type,
            input,
            image,
            max_length,
            temperature,
            top_p,
            normalize,
            evaluate,
            timeout_ms,
            selection,
        } => {
            let task_type = TaskType::new(task_type);
            let payload = build_payload(
                &task_type,
                input,
                image,
                max_length,
                temperature,
                top_p,
                normalize,
            )?;
            let mut options = RouteOptions::new()
                .with_selection(selection.to_options())
                .with_force_evaluation(evaluate);
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }
            cmd_route(&task_type, &payload, &options, format, quiet).await
        }

        Commands::Select {
            task_type,
            selection,
        } => cmd_select(&TaskType::new(task_type), &selection.to_options(), format).await,

        Commands::Models { task_type } => cmd_models(&TaskType::new(task_type), format).await,

        Commands::Stats { task_type } => cmd_stats(&TaskType::new(task_type), format).await,

        Commands::Reports { task_type, limit } => {
            cmd_reports(&TaskType::new(task_type), limit, format).await
        }

        Commands::Feedback {
            model,
            task_type,
            rating,
            accuracy,
        } => cmd_feedback(&model, &TaskType::new(task_type), rating, accuracy, quiet).await,

        Commands::Registry { action } => cmd_registry(action, format, quiet).await,

        Commands::Config { action } => cmd_config(action, quiet),

        Commands::Doctor => cmd_doctor(quiet).await,
    }
}

// ============================================================================
// Setup
// ============================================================================

async fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = config.database.resolved_path();
    debug!(path = %path.display(), "Opening metrics database");
    Database::open(path).await
}

async fn open_registry(config: &Config) -> anyhow::Result<(Database, Arc<ModelRegistry>)> {
    let db = open_database(config).await?;
    let store: Arc<dyn MetricsStore> = Arc::new(SqliteMetricsStore::from_database(&db));
    let registry = Arc::new(ModelRegistry::load(store).await);
    Ok((db, registry))
}

fn build_payload(
    task_type: &TaskType,
    input: Option<String>,
    image: Option<PathBuf>,
    max_length: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    normalize: bool,
) -> anyhow::Result<TaskPayload> {
    if let Some(path) = image {
        let data = std::fs::read(&path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        return Ok(TaskPayload::Image { data, task: input });
    }

    let input = input.context("An input is required unless --image is given")?;
    if task_type.as_str() == TaskType::EMBEDDING {
        return Ok(TaskPayload::Embedding {
            input: EmbeddingInput::Text(input),
            encoder_type: None,
            normalize,
        });
    }

    Ok(TaskPayload::Text {
        prompt: input,
        max_length,
        temperature,
        top_p,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn describe_output(output: &TaskOutput) -> String {
    match output {
        TaskOutput::Text(generation) => generation.text.clone(),
        TaskOutput::Embedding(embedding) => {
            let preview: Vec<String> = embedding
                .values
                .iter()
                .take(5)
                .map(|v| format!("{:.4}", v))
                .collect();
            format!(
                "[{}{}] ({} dimensions)",
                preview.join(", "),
                if embedding.dimensions > 5 { ", ..." } else { "" },
                embedding.dimensions
            )
        }
        TaskOutput::Image(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_route(
    task_type: &TaskType,
    payload: &TaskPayload,
    options: &RouteOptions,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (db, registry) = open_registry(&config).await?;
    let providers = ProviderSet::from_env(&config)?;

    let router = ModelRouter::builder(registry)
        .config(RouterConfig::from_settings(&config.router))
        .providers(providers)
        .build();

    let result = match router.route(task_type, payload, options).await {
        Ok(result) => result,
        Err(e) => {
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            db.close().await;
            return Err(anyhow::anyhow!("[{}] {}", e.code(), e));
        }
    };
    db.close().await;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            if !quiet {
                println!("Model: {}", result.model_id);
                println!("Time:  {:.1} ms", result.execution_time_ms);
                println!("Cost:  {}", fmt_opt(result.metrics.total_cost(), 6));
                println!();
            }
            println!("{}", describe_output(&result.output));
        }
    }
    Ok(())
}

async fn cmd_select(
    task_type: &TaskType,
    options: &SelectionOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (db, registry) = open_registry(&config).await?;
    let model = registry.select_best_model(task_type, options).await;
    db.close().await;

    match format {
        OutputFormat::Json => print_json(&model)?,
        OutputFormat::Text => println!("{}", model),
    }
    Ok(())
}

async fn cmd_models(task_type: &TaskType, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (db, registry) = open_registry(&config).await?;
    let models = registry.get_all_models(task_type).await;
    db.close().await;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Text => {
            if models.is_empty() {
                println!("No candidate models for '{}'", task_type);
            }
            for model in models {
                println!("{}", model);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatsView {
    task_type: TaskType,
    rotation: TaskCounter,
    models: Vec<ModelPerformance>,
}

async fn cmd_stats(task_type: &TaskType, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (db, registry) = open_registry(&config).await?;
    let models = registry.performance_summary(task_type).await;
    let rotation = registry.rotation_status(task_type).await;
    db.close().await;

    let view = StatsView {
        task_type: task_type.clone(),
        rotation,
        models: models?,
    };

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Text => {
            println!("Task type: {}", view.task_type);
            println!(
                "Rotation:  {:?} (count {}, {} evaluation tasks remaining)",
                view.rotation.mode, view.rotation.count, view.rotation.evaluation_tasks_remaining
            );
            if let Some(at) = view.rotation.last_evaluation_at {
                println!("Last evaluation: {}", at.to_rfc3339());
            }
            println!();
            println!(
                "{:<48} {:>7} {:>9} {:>11} {:>10} {:>8} {:>10}",
                "MODEL", "SAMPLES", "ACCURACY", "LATENCY MS", "COST", "RATING", "SCORE"
            );
            for perf in &view.models {
                let agg = &perf.aggregate;
                println!(
                    "{:<48} {:>7} {:>9} {:>11} {:>10} {:>8} {:>10.3}{}",
                    agg.model_id.to_string(),
                    agg.samples,
                    fmt_opt(agg.avg_accuracy, 3),
                    fmt_opt(agg.avg_latency_ms, 1),
                    fmt_opt(agg.avg_cost, 6),
                    fmt_opt(agg.avg_user_rating, 2),
                    perf.score,
                    if perf.configured { "" } else { " (unlisted)" }
                );
            }
        }
    }
    Ok(())
}

async fn cmd_reports(task_type: &TaskType, limit: usize, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let db = open_database(&config).await?;
    let store = SqliteMetricsStore::from_database(&db);
    let reports = store.reports(task_type, limit).await;
    db.close().await;
    let reports = reports?;

    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("No evaluation reports for '{}'", task_type);
            }
            for report in &reports {
                println!("{}  best: {}", report.timestamp.to_rfc3339(), report.best_model_id);
                for record in &report.results {
                    println!(
                        "  #{} {:<44} {:>10} ms",
                        report.rank_of(&record.model_id).unwrap_or_default(),
                        record.model_id.to_string(),
                        fmt_opt(record.metrics.latency_ms, 1)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn cmd_feedback(
    model: &ModelIdentifier,
    task_type: &TaskType,
    rating: Option<f64>,
    accuracy: Option<f64>,
    quiet: bool,
) -> anyhow::Result<()> {
    if rating.is_none() && accuracy.is_none() {
        anyhow::bail!("Provide --rating and/or --accuracy");
    }
    for (name, value) in [("rating", rating), ("accuracy", accuracy)] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("{} must be between 0.0 and 1.0, got {}", name, v);
            }
        }
    }

    let mut metrics = PerformanceMetrics::new();
    if let Some(rating) = rating {
        metrics = metrics.with_user_rating(rating);
    }
    if let Some(accuracy) = accuracy {
        metrics = metrics.with_accuracy(accuracy);
    }

    let config = Config::load()?;
    let db = open_database(&config).await?;
    let store = SqliteMetricsStore::from_database(&db);
    let record = EvaluationRecord::new(model.clone(), task_type.clone(), metrics);
    let result = store.append_record(&record).await;
    db.close().await;
    result?;

    if !quiet {
        println!("Recorded feedback for {} on '{}'", model, task_type);
    }
    Ok(())
}

async fn cmd_registry(action: RegistryAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (db, registry) = open_registry(&config).await?;
    let current = registry.configuration().await;

    let update = match action {
        RegistryAction::Show => None,
        RegistryAction::SetCycles {
            standard,
            evaluation,
        } => Some(RegistryConfigUpdate::new().cycle_lengths(standard, evaluation)),
        RegistryAction::Weights {
            accuracy,
            latency,
            cost,
        } => Some(RegistryConfigUpdate::new().weights(MetricWeights::new(accuracy, latency, cost))),
        RegistryAction::Enable { provider } => {
            let mut settings = provider_settings(&current, provider);
            settings.enabled = true;
            Some(RegistryConfigUpdate::new().provider(provider, settings))
        }
        RegistryAction::Disable { provider } => {
            let mut settings = provider_settings(&current, provider);
            settings.enabled = false;
            Some(RegistryConfigUpdate::new().provider(provider, settings))
        }
        RegistryAction::SetDefault {
            provider,
            task_type,
            model,
        } => {
            let settings = provider_settings(&current, provider).with_default(task_type, model);
            Some(RegistryConfigUpdate::new().provider(provider, settings))
        }
        RegistryAction::AddModel {
            provider,
            task_type,
            model,
        } => {
            let settings = provider_settings(&current, provider).with_additional(task_type, model);
            Some(RegistryConfigUpdate::new().provider(provider, settings))
        }
    };

    let shown = match update {
        Some(update) => {
            let result = registry.update_configuration(update).await;
            db.close().await;
            let updated = result?;
            if !quiet && format == OutputFormat::Text {
                println!("Registry configuration updated.");
            }
            updated
        }
        None => {
            db.close().await;
            current
        }
    };

    match format {
        OutputFormat::Json => print_json(&shown)?,
        OutputFormat::Text => {
            if !quiet {
                print_registry(&shown);
            }
        }
    }
    Ok(())
}

fn provider_settings(config: &RegistryConfig, provider: Provider) -> ProviderSettings {
    config.providers.get(&provider).cloned().unwrap_or_default()
}

fn print_registry(config: &RegistryConfig) {
    println!("Rotation:");
    println!("  Standard cycle:   {} tasks", config.standard_cycle_length);
    println!("  Evaluation cycle: {} tasks", config.evaluation_cycle_length);
    println!("Weights:");
    println!("  Accuracy: {}", config.metric_weights.accuracy);
    println!("  Latency:  {}", config.metric_weights.latency);
    println!("  Cost:     {}", config.metric_weights.cost);
    println!("Providers:");
    for (provider, settings) in &config.providers {
        println!(
            "  {} ({})",
            provider,
            if settings.enabled { "enabled" } else { "disabled" }
        );
        for (task_type, model) in &settings.default_models {
            println!("    {:<18} {}", task_type, model);
        }
        for (task_type, models) in &settings.additional_models {
            println!("    {:<18} + {}", task_type, models.join(", "));
        }
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Modelmux Health Check");
        println!("=====================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
                println!();
                println!("Some checks failed. See above for details.");
            }
            return Ok(());
        }
    };

    // API keys
    for provider in Provider::PRIORITY {
        let Some(var) = api_key_env(provider) else {
            if !quiet {
                println!(
                    "[--] {}: No key needed ({})",
                    provider,
                    config.providers.base_url(provider)
                );
            }
            continue;
        };
        match resolved_api_key(provider) {
            Some(_) => {
                if !quiet {
                    println!("[OK] {}: API key configured", provider);
                }
            }
            None => {
                if !quiet {
                    warn!(provider = %provider, "API key not configured");
                    println!("[--] {}: Not configured (set {})", provider, var);
                }
            }
        }
    }

    // Config file location
    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => {
                println!("[!!] Config file: Error - {}", e);
            }
        }
    }

    // Metrics database
    match open_database(&config).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: Connected");
                        println!("     Path: {}", db.path().display());
                    }
                    match db.migration_status().await {
                        Ok(status) if status.needs_migration => {
                            all_ok = false;
                            if !quiet {
                                println!(
                                    "[!!] Database: Migrations pending (v{} -> v{})",
                                    status.current_version, status.target_version
                                );
                            }
                        }
                        Ok(status) => {
                            if !quiet {
                                println!("[OK] Database: Schema v{}", status.current_version);
                            }
                        }
                        Err(e) => {
                            all_ok = false;
                            if !quiet {
                                println!("[!!] Database: Migration check failed - {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Health check failed - {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}
