mod sink;

use anyhow::{bail, Context, Result};
use clap::Parser;
use marq_engine::config::{ConfigLoader, MarqConfig};
use marq_engine::oracle::{DecisionOracle, OpenAiOracle, OracleConfig};
use marq_engine::workflow::{RunReport, WorkflowEngine};
use marq_h::{HeadlessBackend, LaunchOptions};
use sink::FileSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use marq_engine::backend::PageBackend;

#[derive(Parser)]
#[command(name = "marq", version, about = "Set-of-marks visual browser agent")]
struct Args {
    /// Natural-language query, e.g. "create a project called Q3 in Asana"
    query: Option<String>,

    /// Run every query in this file, one per line (# starts a comment)
    #[arg(long)]
    batch: Option<PathBuf>,

    /// Force headless mode regardless of config
    #[arg(long)]
    headless: bool,

    /// Named browser session whose login state persists across runs
    #[arg(long)]
    session: Option<String>,

    /// Override the iteration cap
    #[arg(long)]
    max_steps: Option<u32>,

    /// Config file path (defaults to ./marq.yaml, then ~/.marq/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, default_value = "data/runs")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to stderr so stdout stays clean for run output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    if let Some(max_steps) = args.max_steps {
        config.workflow.max_iterations = max_steps;
    }

    let queries = gather_queries(&args).await?;
    if queries.is_empty() {
        bail!("no queries to run; pass a query or --batch <file>");
    }

    let api_key = MarqConfig::api_key_from_env()
        .context("no API key found; set MARQ_OPENAI_API_KEY or OPENAI_API_KEY")?;
    let oracle = Arc::new(OpenAiOracle::new(OracleConfig {
        api_key,
        base_url: config.oracle.base_url.clone(),
        model: config.oracle.model.clone(),
        max_tokens: config.oracle.max_tokens,
        temperature: config.oracle.temperature,
        request_timeout: Duration::from_secs(config.oracle.request_timeout_secs),
    })?);

    // Ctrl-C flips the cancellation flag; runs stop at the next iteration.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    let mut any_failed = false;
    for query in &queries {
        if *cancel_rx.borrow() {
            break;
        }
        let report = run_query(&args, &config, oracle.clone(), cancel_rx.clone(), query).await?;
        print_report(&report);
        if !report.completed() {
            any_failed = true;
        }
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn gather_queries(args: &Args) -> Result<Vec<String>> {
    if let Some(path) = &args.batch {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading batch file {}", path.display()))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect())
    } else {
        Ok(args.query.iter().cloned().collect())
    }
}

async fn run_query(
    args: &Args,
    config: &MarqConfig,
    oracle: Arc<OpenAiOracle>,
    cancel: watch::Receiver<bool>,
    query: &str,
) -> Result<RunReport> {
    let spec = oracle.parse_query(query).await?;
    let start_url = config.resolve_app_url(&spec.app);
    info!(app = %spec.app, task = %spec.task, url = %start_url, "resolved query");

    let file_sink = Arc::new(
        FileSink::create(&args.out, &spec)
            .await
            .context("creating run artifact directory")?,
    );
    info!(dir = %file_sink.dir().display(), "run artifacts");

    let headless = args.headless || config.browser.headless;
    let mut backend = HeadlessBackend::new(LaunchOptions {
        visible: !headless,
        session: args.session.clone(),
        viewport: Some((config.browser.viewport_width, config.browser.viewport_height)),
    });
    backend
        .launch()
        .await
        .context("launching browser backend")?;

    let engine = WorkflowEngine::new(oracle, config.workflow.clone())
        .with_sink(file_sink)
        .with_cancellation(cancel);

    let result = engine.run(&mut backend, &spec, &start_url).await;

    if let Err(e) = backend.close().await {
        warn!(error = %e, "browser close failed");
    }

    result.context("writing run summary")
}

fn print_report(report: &RunReport) {
    match report.failure.as_deref() {
        None => println!(
            "DONE  [{}] {} ({} steps, {} iterations)",
            report.app,
            report.task,
            report.steps_completed,
            report.iterations.len()
        ),
        Some(reason) => println!(
            "ABORT [{}] {} after {} iterations: {}",
            report.app,
            report.task,
            report.iterations.len(),
            reason
        ),
    }
}
