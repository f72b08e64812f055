//! chart-sentry command-line interface

use chart_sentry::{
    ChartSentry, HelmRenderer, OutputFormat, ReportFormatter, ReportOptions, RunOptions,
};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chart-sentry",
    about = "Rule-driven validation for chart bundles",
    version
)]
struct Cli {
    /// Directory tree to search for charts
    charts_root: PathBuf,

    /// Rule files or directories (repeatable)
    #[arg(short, long = "rules", required = true)]
    rules: Vec<PathBuf>,

    /// Deployment environment forwarded to the renderer and env matching
    #[arg(short, long)]
    env: Option<String>,

    /// Extra values files passed to the renderer (repeatable)
    #[arg(short = 'f', long = "values")]
    values: Vec<PathBuf>,

    /// Path of the JSON report artifact
    #[arg(long, default_value = "chart-validation-report.json")]
    out: PathBuf,

    /// Also write the human-readable report to this path
    #[arg(long)]
    out_text: Option<PathBuf>,

    /// Number of charts validated in parallel
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Templating binary to invoke
    #[arg(long, default_value = "helm")]
    helm_binary: String,

    /// Per-chart render timeout in seconds
    #[arg(long, default_value_t = 180)]
    timeout: u64,

    /// Replay results for unchanged charts from the cache file
    #[arg(long)]
    cache: bool,

    /// Location of the validation cache
    #[arg(long, default_value = ".chart-sentry-cache.json")]
    cache_file: PathBuf,

    /// Disable ANSI colors in terminal output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "chart_sentry=debug" } else { "chart_sentry=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let renderer =
        HelmRenderer::new(cli.helm_binary.clone(), Duration::from_secs(cli.timeout));
    let mut sentry = ChartSentry::new(&cli.rules)
        .with_renderer(Box::new(renderer))
        .with_options(RunOptions {
            concurrency: cli.concurrency,
            env: cli.env.clone(),
            values: cli.values.clone(),
        });
    if cli.cache {
        sentry = sentry.with_cache_file(&cli.cache_file);
    }

    let report = sentry.validate(&cli.charts_root);

    // Artifacts are written on every run, clean ones included
    let artifact_formatter = ReportFormatter::new(ReportOptions { use_colors: false });
    if let Err(e) = artifact_formatter.write_to_file(&report, OutputFormat::Json, &cli.out) {
        tracing::error!("{}", e);
        process::exit(2);
    }
    if let Some(text_path) = &cli.out_text {
        if let Err(e) = artifact_formatter.write_to_file(&report, OutputFormat::Human, text_path) {
            tracing::error!("{}", e);
            process::exit(2);
        }
    }

    let terminal = ReportFormatter::new(ReportOptions { use_colors: !cli.no_color });
    match terminal.format(&report, OutputFormat::Human) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(2);
        }
    }

    process::exit(report.exit_code());
}
