//! Certkeeper - main entry point
//!
//! Renews every certificate of a catalog and prints the run report as JSON
//! on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use certkeeper::catalog;
use certkeeper::{CatalogLayout, CertbotIssuer, FsObjectStore, ObjectStore, Orchestrator, RunOptions};
use certkeeper_config::{validate_config, LogFormat, RunnerConfig, StorageBackend};

/// Exit status of a strict run with failed records
const EXIT_RECORD_FAILURES: u8 = 2;

/// Certkeeper - renews ACME certificates kept in object storage
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Runner configuration file
    #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Bucket holding the catalog
    #[arg(short = 'b', long = "bucket", env = "CA_BUCKET", global = true)]
    bucket: Option<String>,

    /// Key prefix of the catalog inside the bucket
    #[arg(short = 'p', long = "prefix", env = "CA_PREFIX", global = true)]
    prefix: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format (overrides the configuration file)
    #[arg(long = "log-format", value_parser = parse_log_format, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Renew the catalog (default)
    Run(RunArgs),
    /// List the catalog's certificates and exit
    Discover,
    /// Validate the configuration and exit
    Validate,
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Exit non-zero when any certificate failed
    #[arg(long = "strict")]
    strict: bool,

    /// Keep the working area for inspection
    #[arg(long = "retain")]
    retain: bool,

    /// Certificates renewed at the same time
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,

    /// Do not upload issued certificates
    #[arg(long = "no-publish")]
    no_publish: bool,

    /// Skip certificates valid for longer than this many days
    #[arg(long = "renew-before-days")]
    renew_before_days: Option<u32>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    if cli.bucket.is_some() {
        config.catalog.bucket = cli.bucket.clone();
    }
    if cli.prefix.is_some() {
        config.catalog.prefix = cli.prefix.clone();
    }

    init_logging(&config, cli.log_format, cli.verbose);

    match cli.command {
        Some(Commands::Validate) => validate(&config),
        Some(Commands::Discover) => discover(&config),
        Some(Commands::Run(args)) => run(config, args),
        None => run(config, RunArgs::default()),
    }
}

fn init_logging(config: &RunnerConfig, format: Option<LogFormat>, verbose: bool) {
    let log_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format.unwrap_or(config.logging.format) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Bucket and prefix, which have no usable defaults
fn catalog_location(config: &RunnerConfig) -> Result<(String, String)> {
    let Some(bucket) = config.catalog.bucket.clone() else {
        bail!("no catalog bucket given (use --bucket or CA_BUCKET)");
    };
    let prefix = config.catalog.prefix.clone().unwrap_or_default();
    Ok((bucket, prefix))
}

async fn build_store(config: &RunnerConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage.backend {
        StorageBackend::Filesystem => {
            let Some(root) = &config.storage.root else {
                bail!("storage.root is required for the filesystem backend");
            };
            info!(root = %root.display(), "Using filesystem storage");
            Ok(Arc::new(FsObjectStore::new(root)))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let store = certkeeper::S3ObjectStore::from_env(config.storage.region.clone()).await;
            info!("Using S3 storage");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => {
            bail!("S3 storage requested but certkeeper was built without the 's3' feature")
        }
    }
}

/// Validate configuration and exit
fn validate(config: &RunnerConfig) -> Result<ExitCode> {
    config
        .validate_all()
        .context("Configuration validation failed")?;

    let result = validate_config(config);
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }

    if !result.is_ok() {
        bail!("configuration has {} error(s)", result.errors.len());
    }

    println!("certkeeper: configuration is valid");
    Ok(ExitCode::SUCCESS)
}

/// List the catalog and exit
fn discover(config: &RunnerConfig) -> Result<ExitCode> {
    let (bucket, prefix) = catalog_location(config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    let identifiers = runtime.block_on(async {
        let store = build_store(config).await?;
        catalog::discover(store.as_ref(), &bucket, &CatalogLayout::new(&prefix))
            .await
            .context("Catalog discovery failed")
    })?;

    println!("{}", serde_json::to_string_pretty(&identifiers)?);
    Ok(ExitCode::SUCCESS)
}

/// Renew the catalog
fn run(mut config: RunnerConfig, args: RunArgs) -> Result<ExitCode> {
    if args.retain {
        config.working_area.retain = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.renewal.concurrency = concurrency;
    }
    if args.no_publish {
        config.renewal.publish = false;
    }
    if args.renew_before_days.is_some() {
        config.renewal.renew_before_days = args.renew_before_days;
    }
    config
        .validate_all()
        .context("Invalid configuration after command-line overrides")?;

    let (bucket, prefix) = catalog_location(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    let report = runtime.block_on(async {
        let store = build_store(&config).await?;
        let issuer = Arc::new(CertbotIssuer::new(&config.certbot));
        let orchestrator = Orchestrator::new(store, issuer, RunOptions::from_config(&config));

        tokio::select! {
            report = orchestrator.run(&bucket, &prefix) => {
                report.context("Renewal run aborted")
            }
            _ = shutdown_signal() => {
                warn!("Shutdown signal received, abandoning run");
                bail!("renewal run cancelled")
            }
        }
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.strict && report.has_failures() {
        return Ok(ExitCode::from(EXIT_RECORD_FAILURES));
    }
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
