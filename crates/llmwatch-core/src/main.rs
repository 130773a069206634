//! llmwatch CLI
//!
//! Command-line interface for the llmwatch evaluation runner.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use llmwatch::config::LoggingConfig;
use llmwatch::models::CycleReport;
use llmwatch::oracle::{OllamaEmbedder, OllamaJudge};
use llmwatch::store::open_store;
use llmwatch::{Config, Runner};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// llmwatch - Quality, drift and alerting for LLM telemetry
#[derive(Parser)]
#[command(name = "llmwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "LLMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run evaluation cycles on the configured interval until interrupted
    Run {
        /// Serve Prometheus metrics on this address (overrides metrics.prometheus_listen)
        #[arg(long, env = "LLMWATCH_METRICS_LISTEN")]
        metrics_listen: Option<String>,
    },

    /// Run a single evaluation cycle and print its report
    Once,

    /// Print the effective configuration
    Config,

    /// Check the store and the Ollama server
    Health,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return ExitCode::SUCCESS;
    }

    // Configuration errors are fatal before any cycle runs
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run { metrics_listen } => run_daemon(config, metrics_listen).await,
        Commands::Once => run_once(config, cli.format).await,
        Commands::Config => show_config(&config, cli.format),
        Commands::Health => run_health(config, cli.format).await,
        Commands::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level
/// unless `--verbose` is given.
fn init_logging(config: &LoggingConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let (writer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "llmwatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_writer(writer)).try_init()?;
    }

    Ok(guard)
}

async fn build_runner(config: &Config) -> anyhow::Result<Runner> {
    let store = open_store(&config.database)
        .await
        .context("opening telemetry store")?;
    let judge = OllamaJudge::new(&config.judge, config.evaluation.call_timeout)?;
    let embedder = OllamaEmbedder::new(&config.embedding, config.evaluation.call_timeout)?;

    let runner = Runner::new(store, Arc::new(judge), Arc::new(embedder), config)?;
    runner.initialize().await.context("restoring runner state")?;
    Ok(runner)
}

async fn run_daemon(config: Config, metrics_listen: Option<String>) -> anyhow::Result<()> {
    if let Some(listen) = metrics_listen.or_else(|| config.metrics.prometheus_listen.clone()) {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid metrics address '{listen}'"))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let runner = build_runner(&config).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal.cancel();
        }
    });

    runner.run(shutdown).await;
    Ok(())
}

async fn run_once(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let runner = build_runner(&config).await?;
    let report = runner.run_once().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    let elapsed = report.finished_at - report.started_at;
    println!("Cycle {}", report.id);
    println!("  duration:           {}ms", elapsed.num_milliseconds());
    println!("  fetched:            {}", report.fetched);
    println!(
        "  evaluated:          {} succeeded, {} failed, {} skipped",
        report.succeeded, report.failed, report.skipped
    );
    println!("  left for next cycle: {}", report.unfinished);
    println!("  drift metrics:      {}", report.drift_metrics);
    println!("  persistence errors: {}", report.persistence_errors);

    if !report.transitions.is_empty() {
        println!();
        println!("Alert transitions:");
        for t in &report.transitions {
            println!(
                "  [{}] {} / {}: {:?} -> {:?} (value {:.3})",
                t.severity.as_str(),
                t.rule_id,
                t.app_id,
                t.from_state,
                t.to_state,
                t.value
            );
        }
    }

    if !report.skipped_rules.is_empty() {
        println!();
        println!("Rules skipped for missing data:");
        for s in &report.skipped_rules {
            println!("  {} / {} ({})", s.rule_id, s.app_id, s.metric);
        }
    }
}

fn show_config(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let rules = config.alert_rules()?;
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "config": redacted_config(config)?,
                "effective_rules": rules,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("database.url            = {}", redact(&config.database.url));
            println!("judge                   = {} @ {}", config.judge.model, config.judge.base_url);
            println!(
                "embedding               = {} ({} dims) @ {}",
                config.embedding.model, config.embedding.dimensions, config.embedding.base_url
            );
            println!("evaluation.batch_size   = {}", config.evaluation.batch_size);
            println!("evaluation.workers      = {}", config.evaluation.workers);
            println!("evaluation.max_attempts = {}", config.evaluation.max_attempts);
            println!(
                "evaluation.call_timeout = {}",
                humantime::format_duration(config.evaluation.call_timeout)
            );
            println!(
                "evaluation.lookback     = {}",
                humantime::format_duration(config.evaluation.lookback)
            );
            println!("drift.min_samples       = {}", config.drift.min_samples);
            println!("drift.smoothing         = {}", config.drift.smoothing);
            println!(
                "runner.interval         = {}",
                humantime::format_duration(config.runner.interval)
            );
            println!(
                "runner.cycle_budget     = {}",
                humantime::format_duration(config.runner.cycle_budget)
            );
            println!();
            println!("Alert rules:");
            for rule in &rules {
                let scope = rule.app_id.as_deref().unwrap_or("*");
                println!(
                    "  {:<14} {} {:?} {} [{}] app={} resolve_after={}",
                    rule.id,
                    rule.metric,
                    rule.operator,
                    rule.threshold,
                    rule.severity.as_str(),
                    scope,
                    rule.resolve_after_cycles
                );
            }
        }
    }
    Ok(())
}

/// Configuration as JSON with the database password hidden
fn redacted_config(config: &Config) -> anyhow::Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(url) = value.pointer_mut("/database/url") {
        *url = serde_json::Value::String(redact(&config.database.url));
    }
    Ok(value)
}

/// Hide the password part of a connection URL
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

async fn run_health(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let store = match open_store(&config.database).await {
        Ok(store) => store.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    let judge = OllamaJudge::new(&config.judge, config.evaluation.call_timeout)?
        .health_check()
        .await
        .map_err(|e| e.to_string());
    let embedding = OllamaEmbedder::new(&config.embedding, config.evaluation.call_timeout)?
        .health_check()
        .await
        .map_err(|e| e.to_string());

    let checks = [("store", store), ("judge", judge), ("embedding", embedding)];
    let healthy = checks.iter().all(|(_, r)| r.is_ok());

    match format {
        OutputFormat::Json => {
            let components: serde_json::Map<String, serde_json::Value> = checks
                .iter()
                .map(|(name, result)| {
                    let value = match result {
                        Ok(()) => serde_json::json!({"status": "ok"}),
                        Err(e) => serde_json::json!({"status": "error", "error": e}),
                    };
                    ((*name).to_string(), value)
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "healthy": healthy,
                    "components": components,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("System Health Check");
            println!("-------------------");
            for (name, result) in &checks {
                match result {
                    Ok(()) => println!("{name:<10} ok"),
                    Err(e) => println!("{name:<10} error: {e}"),
                }
            }
        }
    }

    if healthy {
        Ok(())
    } else {
        anyhow::bail!("one or more components are unhealthy")
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "llmwatch", &mut io::stdout());
}
