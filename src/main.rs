use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use runx_bootstrap::bootstrap::report_setup_failure;
use runx_bootstrap::{
    Bootstrap, Bucket, ChainedRoots, Config, EnvRoots, ExitOutcome, Launcher, LibtestEngine,
    ReportFormat, ShardAuthority, StaticRoots,
};

const CONFIG_FILE: &str = "runx-bootstrap.toml";

#[derive(Parser)]
#[command(name = "runx-bootstrap")]
#[command(about = "Discover, shard and run the tests found on class roots")]
#[command(version)]
struct Cli {
    /// Path to config file (default: runx-bootstrap.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Class roots to scan, separated like PATH
    #[arg(long)]
    roots: Option<String>,

    /// Index of this worker among the parallel buckets
    #[arg(long, env = "RUNX_BUCKET_INDEX")]
    bucket_index: Option<usize>,

    /// Number of parallel buckets
    #[arg(long, env = "RUNX_BUCKET_COUNT")]
    bucket_count: Option<usize>,

    /// Progress output format
    #[arg(long, value_enum)]
    reporter: Option<ReportFormat>,
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUNX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let outcome = run(cli);
    std::process::exit(outcome.code());
}

fn run(cli: Cli) -> ExitOutcome {
    let (bootstrap, format) = match build(cli) {
        Ok(built) => built,
        Err(e) => return report_setup_failure(&e),
    };

    let mut listener = format.listener();
    bootstrap.run(listener.as_mut())
}

fn build(cli: Cli) -> Result<(Bootstrap, ReportFormat)> {
    let explicit = cli.config.is_some();
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = Config::load_or_default(&config_path, explicit)
        .with_context(|| format!("Could not load {}", config_path.display()))?;

    if let Some(index) = cli.bucket_index {
        config.bucketing.bucket_index = index;
    }
    if let Some(count) = cli.bucket_count {
        config.bucketing.bucket_count = count;
    }
    config.validate()?;

    let authority = ShardAuthority::from_config(&config.bucketing)
        .context("Invalid bucketing configuration")?;
    let bucket: Bucket = authority.bucket();
    if bucket.count > 1 {
        eprintln!("Running bucket {} of {}", bucket.index + 1, bucket.count);
    }

    let mut roots = ChainedRoots::new();
    if let Some(cli_roots) = cli.roots {
        let paths = std::env::split_paths(&cli_roots)
            .map(|p| p.display().to_string())
            .collect();
        roots = roots.then(StaticRoots::new(Some(paths)));
    }
    if let Some(var) = &config.roots.env {
        roots = roots.then(EnvRoots::new(var));
    }
    roots = roots.then(StaticRoots::new(config.roots.paths.clone()));

    let launcher = Launcher::new().register(LibtestEngine::new(&config.engine.search_path));

    let bootstrap = Bootstrap::new(Box::new(roots), Arc::new(authority), launcher)
        .with_excluded_engines(config.engine.exclude.iter().cloned());

    let format = cli.reporter.unwrap_or(config.report.format);
    Ok((bootstrap, format))
}
