//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trackdocs_client::{HttpTrackerClient, RetryingClient, TrackerClient};
use trackdocs_core::{
    HarvestResult, JsonDirIndex, ProgressReporter, harvest, index_documents, validate_index,
};
use trackdocs_harvester::ContentFilter;
use trackdocs_shared::{AppConfig, HarvestConfig, init_config, load_config, resolve_credentials};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// trackdocs — turn tracker issues into indexable documents.
#[derive(Parser)]
#[command(
    name = "trackdocs",
    version,
    about = "Harvest issues, comments and text attachments from the tracker into JSON documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the number of issues visible to the configured account.
    Count,

    /// Fetch every issue and write the document index.
    Harvest {
        /// Output directory for the index (defaults to `[output] index_dir`).
        #[arg(short, long)]
        out: Option<String>,

        /// Issues per listing page (1-100).
        #[arg(long)]
        page_size: Option<u32>,

        /// Concurrent page listings.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Concurrent issue assemblies.
        #[arg(long)]
        detail_concurrency: Option<usize>,

        /// Attempts per remote call.
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Check an index directory against its manifest.
    Verify {
        /// Index directory (defaults to `[output] index_dir`).
        #[arg(long)]
        index: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "trackdocs=info",
        1 => "trackdocs=debug",
        _ => "trackdocs=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Count => cmd_count().await,
        Command::Harvest {
            out,
            page_size,
            concurrency,
            detail_concurrency,
            retries,
        } => {
            let overrides = HarvestOverrides {
                page_size,
                list_concurrency: concurrency,
                detail_concurrency,
                retry_attempts: retries,
            };
            cmd_harvest(out.as_deref(), &overrides).await
        }
        Command::Verify { index } => cmd_verify(index.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// CLI flags that override `[harvest]` settings.
#[derive(Debug, Default)]
struct HarvestOverrides {
    page_size: Option<u32>,
    list_concurrency: Option<usize>,
    detail_concurrency: Option<usize>,
    retry_attempts: Option<u32>,
}

impl HarvestOverrides {
    fn apply(&self, config: &AppConfig) -> HarvestConfig {
        let mut harvest = HarvestConfig::from(config);
        if let Some(v) = self.page_size {
            harvest.page_size = v;
        }
        if let Some(v) = self.list_concurrency {
            harvest.list_concurrency = v;
        }
        if let Some(v) = self.detail_concurrency {
            harvest.detail_concurrency = v;
        }
        if let Some(v) = self.retry_attempts {
            harvest.retry_attempts = v;
        }
        harvest
    }
}

fn build_client(config: &AppConfig) -> Result<Arc<dyn TrackerClient>> {
    let credentials = resolve_credentials(&config.tracker)?;
    let client = HttpTrackerClient::new(&config.tracker, credentials)?;
    Ok(Arc::new(client))
}

fn index_dir(config: &AppConfig, out: Option<&str>) -> PathBuf {
    PathBuf::from(out.unwrap_or(&config.output.index_dir))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_count() -> Result<()> {
    let config = load_config()?;
    let client = RetryingClient::new(build_client(&config)?, config.harvest.retry_attempts);

    let count = client.count_issues().await?;
    println!("{count}");
    Ok(())
}

async fn cmd_harvest(out: Option<&str>, overrides: &HarvestOverrides) -> Result<()> {
    let config = load_config()?;
    let harvest_config = overrides.apply(&config);
    harvest_config.validate()?;

    let client = build_client(&config)?;
    let filter = Arc::new(ContentFilter::with_extra(&config.filter.extra_extensions));
    let out_dir = index_dir(&config, out);

    info!(
        base_url = %config.tracker.base_url,
        out = %out_dir.display(),
        page_size = harvest_config.page_size,
        "harvesting tracker"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling harvest");
            on_signal.cancel();
        }
    });

    let reporter = CliProgress::new();
    let result = harvest(client, &harvest_config, filter, &reporter, &cancel).await?;

    reporter.phase("Writing index");
    let mut index = JsonDirIndex::create(&out_dir, env!("CARGO_PKG_VERSION"))?;
    index_documents(&mut index, &result.documents, &reporter)?;
    let manifest = index.finish()?;
    reporter.finish();

    let comments: usize = result.documents.iter().map(|d| d.comments.len()).sum();
    let attachments: usize = result
        .documents
        .iter()
        .map(|d| {
            d.attachments.len() + d.comments.iter().map(|c| c.attachments.len()).sum::<usize>()
        })
        .sum();

    // Print summary
    println!();
    println!("  Harvest complete!");
    println!("  Run:         {}", manifest.run_id);
    println!("  Issues:      {}", manifest.document_count);
    println!("  Comments:    {comments}");
    println!("  Attachments: {attachments}");
    println!("  Pages:       {}", result.page_count);
    println!("  Path:        {}", out_dir.display());
    println!("  Time:        {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn cmd_verify(index: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let dir = index_dir(&config, index);
    if !dir.is_dir() {
        return Err(eyre!("index directory '{}' does not exist", dir.display()));
    }

    let manifest = validate_index(&dir)?;
    println!(
        "{}: {} documents, run {} ({})",
        dir.display(),
        manifest.document_count,
        manifest.run_id,
        manifest.created_at.to_rfc3339()
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ]));
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_listed(&self, page: u32, issues: usize, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Listing [{current}/{total}] page {page} ({issues} issues)"));
    }

    fn issue_assembled(&self, key: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("Assembling [{current}/{total}] {key}"));
    }

    fn issue_indexed(&self, key: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("Indexing [{current}/{total}] {key}"));
    }

    fn done(&self, result: &HarvestResult) {
        self.spinner.set_message(format!(
            "Fetched {} issues in {:.1}s",
            result.documents.len(),
            result.elapsed.as_secs_f64()
        ));
    }
}
