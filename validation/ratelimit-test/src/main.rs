//! Rate limit test CLI for the tiered object-storage gateway.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use ingestion::{IngestOptions, IngestReport, Ingester};
use probe_common::{AuthScheme, ProbeOutcome, ProbeTarget, RunSummary, TenantIdentity, Tier};
use ratelimit_test::{
    compare_runs, PathPattern, ProbeEngine, RunConfig, RunHandle, RunReport, ScenarioConfig,
    StoreReport, TargetSpec, TenantRegistry,
};
use telemetry_store::{MemorySink, StoreConfig, TelemetrySink, TelemetryStore};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "ratelimit-test")]
#[command(about = "Rate limit testing tool for the object-storage gateway", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Gateway base URL
    #[arg(short, long, env = "RATELIMIT_TARGET_URL", default_value = "http://localhost:9000")]
    url: String,

    /// Access key to probe with
    #[arg(short = 'k', long)]
    access_key: String,

    /// Expected tier; looked up in --accounts when omitted
    #[arg(short, long)]
    group: Option<String>,

    /// Secret key for the access key
    #[arg(long)]
    secret_key: Option<String>,

    /// Service accounts file
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Auth scheme (header-v4, header-v2, presigned-query, query-v2, custom-header)
    #[arg(short, long, default_value = "header-v4")]
    scheme: String,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Fixed request path instead of generated object paths
    #[arg(long)]
    path: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,
}

#[derive(Args, Clone)]
struct OutputArgs {
    /// Output format: table (default), json
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Also write the export document to this file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Ingest the results into the telemetry store
    #[arg(long)]
    ingest: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Clone)]
struct StoreArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Use TimescaleDB hypertables and retention jobs
    #[arg(long)]
    timescale: bool,

    /// Write into an in-memory sink instead of the database
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request and show the classified response
    Single {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Sustained load at a fixed rate
    Sustained {
        #[command(flatten)]
        target: TargetArgs,

        /// Requests per second
        #[arg(short, long, default_value = "10")]
        rate: u32,

        /// Test duration in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,

        /// Stop after this many requests
        #[arg(long)]
        max_requests: Option<u64>,

        /// Concurrent workers
        #[arg(short, long, default_value = "10")]
        workers: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Compare several identities side by side
    Compare {
        /// Gateway base URL
        #[arg(short, long, env = "RATELIMIT_TARGET_URL", default_value = "http://localhost:9000")]
        url: String,

        /// Service accounts file to select identities from
        #[arg(long)]
        accounts: Option<PathBuf>,

        /// Extra identity as ACCESS_KEY:TIER, may be repeated
        #[arg(long = "key", value_name = "ACCESS_KEY:TIER")]
        keys: Vec<String>,

        /// Accounts selected per tier
        #[arg(long, default_value = "1")]
        per_tier: usize,

        /// Select twice as many premium accounts
        #[arg(long)]
        stress_premium: bool,

        /// Auth scheme
        #[arg(short, long, default_value = "header-v4")]
        scheme: String,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Requests per second for each identity
        #[arg(short, long, default_value = "20")]
        rate: u32,

        /// Test duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the current rate limit status of an identity
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Probe once with every auth scheme
    AuthMethods {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Service accounts file (overrides the scenario's)
        #[arg(long)]
        accounts: Option<PathBuf>,

        /// Override the rate of every run
        #[arg(short, long)]
        rate: Option<u32>,

        /// Override test duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Ingest an export file into the telemetry store
    Ingest {
        /// Export file (one document or an array)
        #[arg(short, long)]
        file: PathBuf,

        /// Run id to record, enables idempotent re-ingestion
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Stop at the first failed write
        #[arg(long)]
        strict: bool,

        /// Create the schema first
        #[arg(long)]
        provision: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Create tables, indexes and views
    Provision {
        /// PostgreSQL connection URL
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Use TimescaleDB hypertables and retention jobs
        #[arg(long)]
        timescale: bool,

        /// Delete rows past the retention policy
        #[arg(long)]
        enforce_retention: bool,
    },

    /// Show rollups from the telemetry store
    Analyze {
        /// PostgreSQL connection URL
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Hours of hourly trends to show
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Identities in the throttle ranking
        #[arg(long, default_value = "10")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Single { target } => {
            let engine = single_engine(&target)?;
            let probe_target = engine.config().targets[0].clone();
            let probe = engine.probe_once(&probe_target).await;
            fail_on_transport(&probe.result.outcome)?;

            println!("{}", RunReport::format_status(&probe));
            println!("Outcome: {:?}", probe.classification.bucket);
            if let Some(cause) = probe.classification.cause {
                println!("Cause: {:?}", cause);
            }
            println!("Latency: {:.1} ms", probe.result.latency_ms());
            Ok(())
        }
        Commands::Status { target } => {
            let engine = single_engine(&target)?;
            let probe_target = engine.config().targets[0].clone();
            let probe = engine.probe_once(&probe_target).await;
            fail_on_transport(&probe.result.outcome)?;

            println!("{}", RunReport::format_status(&probe));
            Ok(())
        }
        Commands::AuthMethods { target } => {
            let base = resolve_target(&target)?;
            let mut probes = Vec::new();
            for scheme in AuthScheme::ALL {
                let probe_target = ProbeTarget::new(base.tenant.clone(), scheme, base.method);
                let engine = ProbeEngine::new(
                    probe_config("auth-methods", &target, probe_target.clone()),
                )?;
                let probe = engine.probe_once(&probe_target).await;
                probes.push((scheme, probe));
            }

            if probes
                .iter()
                .all(|(_, p)| matches!(p.result.outcome, ProbeOutcome::Transport { .. }))
            {
                anyhow::bail!("Gateway at {} is unreachable", target.url);
            }
            println!("{}", RunReport::format_auth_methods(&probes));
            Ok(())
        }
        Commands::Sustained {
            target,
            rate,
            duration,
            max_requests,
            workers,
            output,
        } => {
            let probe_target = resolve_target(&target)?;
            let mut config = probe_config("sustained", &target, probe_target)
                .with_rate(rate)
                .with_duration(Duration::from_secs(duration))
                .with_workers(workers);
            config.max_requests = max_requests;

            let summaries = run_with_progress(vec![ProbeEngine::new(config)?]).await?;
            emit(&summaries, &output)?;
            ingest_runs(&summaries, &output).await
        }
        Commands::Compare {
            url,
            accounts,
            keys,
            per_tier,
            stress_premium,
            scheme,
            method,
            rate,
            duration,
            output,
        } => {
            let mut tenants = match &accounts {
                Some(path) => {
                    let registry = TenantRegistry::from_file(path)?;
                    info!(counts = ?registry.counts_by_tier(), "Loaded service accounts");
                    registry.select(per_tier, stress_premium)
                }
                None => Vec::new(),
            };
            for key in &keys {
                tenants.push(parse_key(key)?);
            }
            if tenants.is_empty() {
                anyhow::bail!("No identities to compare, pass --accounts or --key");
            }

            let scheme: AuthScheme = scheme.parse()?;
            let method = method.parse()?;
            let engines = tenants
                .into_iter()
                .map(|tenant| {
                    let label = format!("{}-{}", tenant.tier(), tenant.short_key());
                    let config = RunConfig::new(
                        label,
                        url.clone(),
                        vec![ProbeTarget::new(tenant, scheme, method)],
                    )
                    .with_rate(rate)
                    .with_duration(Duration::from_secs(duration));
                    ProbeEngine::new(config)
                })
                .collect::<probe_common::Result<Vec<_>>>()?;

            let summaries = run_with_progress(engines).await?;
            emit(&summaries, &output)?;
            if output.output != "json" {
                println!("{}", RunReport::format_comparison(&compare_runs(&summaries)));
                let combined = RunSummary::combined_totals(&summaries);
                println!(
                    "Combined: {} requests, {} success, {} throttled, {} errors",
                    combined.total(),
                    combined.success,
                    combined.throttled,
                    combined.errors
                );
            }
            ingest_runs(&summaries, &output).await
        }
        Commands::Run {
            scenario,
            accounts,
            rate,
            duration,
            output,
        } => {
            println!("Loading scenario: {}", scenario.display());
            let mut config = ScenarioConfig::from_file(&scenario)?;

            // Apply overrides
            if let Some(r) = rate {
                config.rate = r;
                for run in &mut config.runs {
                    run.rate = None;
                }
            }
            if let Some(d) = duration {
                config.duration_secs = Some(d);
                for run in &mut config.runs {
                    run.duration_secs = None;
                }
            }

            let registry = match accounts.as_ref().or(config.accounts_file.as_ref()) {
                Some(path) => Some(TenantRegistry::from_file(path)?),
                None => None,
            };
            let runs = config.run_configs(registry.as_ref())?;

            println!("✓ Configuration loaded successfully");
            println!("  Name: {}", config.name);
            if !config.description.is_empty() {
                println!("  Description: {}", config.description);
            }
            println!("  Runs: {}", runs.len());
            println!();

            let engines = runs
                .into_iter()
                .map(ProbeEngine::new)
                .collect::<probe_common::Result<Vec<_>>>()?;
            let summaries = run_with_progress(engines).await?;
            emit(&summaries, &output)?;
            if summaries.len() > 1 && output.output != "json" {
                println!("{}", RunReport::format_comparison(&compare_runs(&summaries)));
            }
            ingest_runs(&summaries, &output).await
        }
        Commands::Ingest {
            file,
            run_id,
            strict,
            provision,
            store,
        } => {
            let (sink, memory) = open_sink(&store).await?;
            let ingester = Ingester::new(sink);
            if provision {
                ingester.provision().await?;
            }

            let options = IngestOptions {
                run_id,
                strict,
                ..IngestOptions::default()
            };
            let report = ingester.ingest_file(&file, &options).await?;
            print_ingest_report(&report, memory.as_deref());
            Ok(())
        }
        Commands::Provision {
            database_url,
            timescale,
            enforce_retention,
        } => {
            let mut config = StoreConfig::new(database_url);
            config.timescale = timescale;
            let store = TelemetryStore::connect(config).await?;
            store.provision().await?;
            println!("✓ Schema provisioned");

            if enforce_retention {
                let removed = store.enforce_retention().await?;
                println!("✓ Removed {} expired rows", removed);
            }
            Ok(())
        }
        Commands::Analyze {
            database_url,
            hours,
            limit,
        } => {
            let store = TelemetryStore::connect(StoreConfig::new(database_url)).await?;

            println!("Performance overview");
            println!("{}", StoreReport::format_performance(&store.performance_overview().await?));

            let since = chrono::Utc::now() - chrono::Duration::hours(hours);
            println!("Hourly trends (last {}h)", hours);
            println!("{}", StoreReport::format_trends(&store.hourly_trends(since).await?));

            println!("Throttle ranking");
            println!("{}", StoreReport::format_ranking(&store.rate_limit_ranking(limit).await?));
            Ok(())
        }
    }
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn resolve_target(args: &TargetArgs) -> anyhow::Result<ProbeTarget> {
    let registry = match &args.accounts {
        Some(path) => Some(TenantRegistry::from_file(path)?),
        None => None,
    };
    let spec = TargetSpec {
        access_key: args.access_key.clone(),
        group: args.group.clone(),
        secret_key: args.secret_key.clone(),
        scheme: args.scheme.clone(),
        method: args.method.clone(),
    };
    Ok(spec.resolve(registry.as_ref())?)
}

/// Config for a one-target run built from command-line arguments.
fn probe_config(label: &str, args: &TargetArgs, target: ProbeTarget) -> RunConfig {
    let mut config = RunConfig::new(label, args.url.clone(), vec![target])
        .with_max_requests(1)
        .with_timeout(Duration::from_secs(args.timeout));
    if let Some(path) = &args.path {
        config = config.with_paths(PathPattern::Fixed { path: path.clone() });
    }
    config
}

fn single_engine(args: &TargetArgs) -> anyhow::Result<ProbeEngine> {
    let target = resolve_target(args)?;
    Ok(ProbeEngine::new(probe_config("single", args, target))?)
}

fn parse_key(value: &str) -> anyhow::Result<TenantIdentity> {
    let (access_key, tier) = value
        .split_once(':')
        .with_context(|| format!("Expected ACCESS_KEY:TIER, got '{}'", value))?;
    let tier: Tier = tier.parse()?;
    Ok(TenantIdentity::new(access_key, tier)?)
}

fn fail_on_transport(outcome: &ProbeOutcome) -> anyhow::Result<()> {
    if let ProbeOutcome::Transport { error, kind } = outcome {
        anyhow::bail!("Request failed ({}): {}", kind, error);
    }
    Ok(())
}

/// Start every engine, show live progress from snapshots, then finalize.
async fn run_with_progress(engines: Vec<ProbeEngine>) -> anyhow::Result<Vec<RunSummary>> {
    let progress = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {prefix} {msg}")?
        .progress_chars("##-");

    let mut runs: Vec<(RunHandle, ProgressBar)> = Vec::with_capacity(engines.len());
    for engine in &engines {
        let config = engine.config();
        let expected = expected_requests(config);
        let bar = progress.add(ProgressBar::new(expected));
        bar.set_style(style.clone());
        bar.set_prefix(config.label.clone());
        runs.push((engine.start(), bar));
    }

    loop {
        for (handle, bar) in &runs {
            if let Ok(snapshot) = handle.snapshot().await {
                bar.set_position(snapshot.total());
                bar.set_message(format!(
                    "ok {} / throttled {} / errors {}",
                    snapshot.totals.success, snapshot.totals.throttled, snapshot.totals.errors
                ));
            }
        }
        if runs.iter().all(|(handle, _)| handle.is_finished()) {
            break;
        }
        tokio::time::sleep(PROGRESS_INTERVAL).await;
    }

    let mut summaries = Vec::with_capacity(runs.len());
    for (handle, bar) in runs {
        let summary = handle.finish().await?;
        bar.set_position(summary.total());
        bar.finish_with_message("Complete!");
        summaries.push(summary);
    }
    println!();
    Ok(summaries)
}

fn expected_requests(config: &RunConfig) -> u64 {
    let by_duration = config
        .duration
        .map(|d| d.as_secs().max(1) * u64::from(config.rate));
    match (by_duration, config.max_requests) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 0,
    }
}

fn emit(summaries: &[RunSummary], output: &OutputArgs) -> anyhow::Result<()> {
    match output.output.as_str() {
        "json" => {
            let json = match summaries {
                [single] => RunReport::format_json(single)?,
                many => RunReport::format_json_batch(many)?,
            };
            println!("{}", json);
        }
        _ => {
            for summary in summaries {
                println!("{}", RunReport::format_table(summary));
            }
        }
    }

    if let Some(path) = &output.export {
        let json = RunReport::format_json_batch(summaries)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Results exported to {}", path.display());
    }
    Ok(())
}

async fn open_sink(
    args: &StoreArgs,
) -> anyhow::Result<(Arc<dyn TelemetrySink>, Option<Arc<MemorySink>>)> {
    if args.dry_run {
        let memory = Arc::new(MemorySink::new());
        let sink: Arc<dyn TelemetrySink> = memory.clone();
        return Ok((sink, Some(memory)));
    }

    let url = args
        .database_url
        .clone()
        .context("--database-url or DATABASE_URL is required (or use --dry-run)")?;
    let mut config = StoreConfig::new(url);
    config.timescale = args.timescale;
    let store = TelemetryStore::connect(config).await?;
    let sink: Arc<dyn TelemetrySink> = Arc::new(store);
    Ok((sink, None))
}

async fn ingest_runs(summaries: &[RunSummary], output: &OutputArgs) -> anyhow::Result<()> {
    if !output.ingest && !output.store.dry_run {
        return Ok(());
    }

    let (sink, memory) = open_sink(&output.store).await?;
    let ingester = Ingester::new(sink);
    let mut total = IngestReport::default();
    for summary in summaries {
        let report = ingester
            .ingest_run(summary, &IngestOptions::default())
            .await?;
        total.documents += report.documents;
        total.inserted += report.inserted;
        total.duplicates += report.duplicates;
        total.skipped.extend(report.skipped);
    }
    print_ingest_report(&total, memory.as_deref());
    Ok(())
}

fn print_ingest_report(report: &IngestReport, memory: Option<&MemorySink>) {
    println!(
        "Ingested {} document(s): {} inserted, {} duplicate, {} skipped",
        report.documents,
        report.inserted,
        report.duplicates,
        report.skipped.len()
    );
    for skipped in &report.skipped {
        warn!(record = %skipped.record, error = %skipped.error, "Record not written");
    }
    if let Some(memory) = memory {
        for table in telemetry_store::schema::TABLES {
            println!("  {}: {} row(s)", table, memory.count(table));
        }
    }
}
