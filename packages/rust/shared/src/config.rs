//! Application configuration for trackdocs.
//!
//! User config lives at `~/.trackdocs/trackdocs.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TrackDocsError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "trackdocs.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".trackdocs";

/// Largest page size the tracker accepts for listing operations.
pub const MAX_PER_PAGE: u32 = 100;

// ---------------------------------------------------------------------------
// Config structs (matching trackdocs.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tracker connection settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Fetch pipeline tuning.
    #[serde(default)]
    pub harvest: HarvestSection,

    /// Attachment content filter.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Output locations.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which organisation header the tracker expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgKind {
    /// Yandex 360 organisation (`X-Org-ID`).
    #[default]
    Yandex360,
    /// Cloud organisation (`X-Cloud-Org-ID`).
    Cloud,
}

impl OrgKind {
    /// HTTP header carrying the organisation id.
    pub fn header_name(self) -> &'static str {
        match self {
            OrgKind::Yandex360 => "X-Org-ID",
            OrgKind::Cloud => "X-Cloud-Org-ID",
        }
    }
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// API root, without the version segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the OAuth token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Name of the env var holding the organisation id.
    #[serde(default = "default_org_id_env")]
    pub org_id_env: String,

    /// Organisation flavour, selects the org header.
    #[serde(default)]
    pub org_kind: OrgKind,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            org_id_env: default_org_id_env(),
            org_kind: OrgKind::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.tracker.yandex.net/".into()
}
fn default_token_env() -> String {
    "TRACKER_TOKEN".into()
}
fn default_org_id_env() -> String {
    "TRACKER_ORG_ID".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[harvest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSection {
    /// Issues per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Concurrent page listings.
    #[serde(default = "default_concurrency")]
    pub list_concurrency: usize,

    /// Concurrent per-issue detail fetches.
    #[serde(default = "default_concurrency")]
    pub detail_concurrency: usize,

    /// Attempts per remote call, first try included.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Page size of the single comment listing per issue.
    #[serde(default = "default_comments_page_size")]
    pub comments_page_size: u32,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            list_concurrency: default_concurrency(),
            detail_concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            comments_page_size: default_comments_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    50
}
fn default_concurrency() -> usize {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_comments_page_size() -> u32 {
    MAX_PER_PAGE
}

/// `[filter]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Extensions embedded in addition to the built-in allow-list.
    #[serde(default)]
    pub extra_extensions: Vec<String>,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory of the JSON document index.
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> String {
    "var/index".into()
}

// ---------------------------------------------------------------------------
// Harvest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Issues per listing page; must not exceed [`MAX_PER_PAGE`].
    pub page_size: u32,
    /// Fan-out limit of the page listing stage.
    pub list_concurrency: usize,
    /// Fan-out limit of the detail assembly stage.
    pub detail_concurrency: usize,
    /// Attempts per remote call.
    pub retry_attempts: u32,
    /// Page size of the per-issue comment listing.
    pub comments_page_size: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            page_size: config.harvest.page_size,
            list_concurrency: config.harvest.list_concurrency,
            detail_concurrency: config.harvest.detail_concurrency,
            retry_attempts: config.harvest.retry_attempts,
            comments_page_size: config.harvest.comments_page_size,
        }
    }
}

impl HarvestConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("page_size", self.page_size),
            ("comments_page_size", self.comments_page_size),
        ] {
            if size == 0 || size > MAX_PER_PAGE {
                return Err(TrackDocsError::config(format!(
                    "{name} must be between 1 and {MAX_PER_PAGE}, got {size}"
                )));
            }
        }
        if self.list_concurrency == 0 || self.detail_concurrency == 0 {
            return Err(TrackDocsError::config("concurrency limits must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(TrackDocsError::config("retry_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Secrets resolved from the environment for one run.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub org_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("org_id", &self.org_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.trackdocs/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TrackDocsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.trackdocs/trackdocs.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrackDocsError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        TrackDocsError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrackDocsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrackDocsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrackDocsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Parse the configured API root.
pub fn base_url(config: &TrackerConfig) -> Result<Url> {
    Url::parse(&config.base_url).map_err(|e| {
        TrackDocsError::config(format!("invalid tracker base_url '{}': {e}", config.base_url))
    })
}

/// Read the token and organisation id from the env vars named in the config.
pub fn resolve_credentials(config: &TrackerConfig) -> Result<Credentials> {
    Ok(Credentials {
        token: required_env(&config.token_env, "OAuth token")?,
        org_id: required_env(&config.org_id_env, "organisation id")?,
    })
}

fn required_env(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TrackDocsError::config(format!(
            "tracker {what} not found. Set the {var_name} environment variable."
        ))),
    }
}
