//! Configuration types for harvest components.
//!
//! Two layers:
//! - [`SourceConfig`]: per-source harvest options, stored as JSON on the
//!   harvest source (the same shape CKAN harvest sources use).
//! - [`SourcesConfig`]: the `harvest.toml` file listing the sources the CLI
//!   schedules, each carrying its own `[sources.config]` table.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::HarvestSource;

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for the content fetcher and the action client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Attempts for a GET that fails with a timeout, a connection error or a 5xx.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("dkan-harvest/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl HttpConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// =============================================================================
// Per-source harvest configuration
// =============================================================================

/// What to do with a remote group or organization that has no local match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    /// Do not carry remote references over at all.
    #[default]
    Ignore,
    /// Keep references that already exist locally, drop the rest.
    OnlyLocal,
    /// Keep local matches and create the missing ones from the remote record.
    Create,
}

impl RemotePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemotePolicy::Ignore => "ignore",
            RemotePolicy::OnlyLocal => "only_local",
            RemotePolicy::Create => "create",
        }
    }
}

impl fmt::Display for RemotePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default strftime pattern of legacy DKAN resource dates.
pub const DEFAULT_REMOTE_DATE_FORMAT: &str = "%d/%m/%y - %H:%M";

/// Default number of leading characters (a weekday label) before a legacy date.
pub const DEFAULT_DATE_PREFIX_LEN: usize = 4;

/// Default literal label DKAN puts in front of `last_modified` values.
pub const DEFAULT_LAST_MODIFIED_LABEL: &str = "Date changed";

/// Options of one harvest source.
///
/// Every field is optional in the serialized form; missing fields take the
/// values from [`SourceConfig::default`].
///
/// # Examples
///
/// ```
/// use dkan_harvest_core::config::{RemotePolicy, SourceConfig};
///
/// let config = SourceConfig::from_json(r#"{
///     "remote_orgs": "only_local",
///     "default_tags": ["dkan"],
///     "organizations_filter_include": ["health"]
/// }"#).unwrap();
///
/// assert_eq!(config.remote_orgs, RemotePolicy::OnlyLocal);
/// assert_eq!(config.remote_groups, RemotePolicy::Ignore);
/// assert_eq!(config.organization_filter_terms(), vec!["organization:health"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub organizations_filter_include: Vec<String>,
    pub organizations_filter_exclude: Vec<String>,
    /// Always run a full search, even when a previous job succeeded.
    pub force_all: bool,
    pub default_tags: Vec<String>,
    /// Local group names or ids added to every imported package.
    pub default_groups: Vec<String>,
    /// Extras added to every imported package. String values may contain
    /// `{harvest_source_id}`-style placeholders.
    pub default_extras: BTreeMap<String, Value>,
    pub override_extras: bool,
    pub clean_tags: bool,
    pub remote_groups: RemotePolicy,
    pub remote_orgs: RemotePolicy,
    pub remote_date_format: String,
    pub date_prefix_len: usize,
    pub last_modified_label: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            organizations_filter_include: Vec::new(),
            organizations_filter_exclude: Vec::new(),
            force_all: false,
            default_tags: Vec::new(),
            default_groups: Vec::new(),
            default_extras: BTreeMap::new(),
            override_extras: false,
            clean_tags: false,
            remote_groups: RemotePolicy::Ignore,
            remote_orgs: RemotePolicy::Ignore,
            remote_date_format: DEFAULT_REMOTE_DATE_FORMAT.to_string(),
            date_prefix_len: DEFAULT_DATE_PREFIX_LEN,
            last_modified_label: DEFAULT_LAST_MODIFIED_LABEL.to_string(),
        }
    }
}

impl SourceConfig {
    /// Parses the JSON config stored on a harvest source.
    ///
    /// An empty string yields the defaults.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: SourceConfig = serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid source config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot check on its own.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.remote_date_format.trim().is_empty() {
            return Err(AppError::ConfigError(
                "remote_date_format must not be empty".to_string(),
            ));
        }
        if self.default_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(AppError::ConfigError(
                "default_tags must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the organization filter terms for the remote `fq` parameter.
    ///
    /// The include list wins over the exclude list when both are set.
    pub fn organization_filter_terms(&self) -> Vec<String> {
        if !self.organizations_filter_include.is_empty() {
            if !self.organizations_filter_exclude.is_empty() {
                tracing::warn!(
                    "Both organizations_filter_include and organizations_filter_exclude are set, ignoring the exclude list"
                );
            }
            let term = self
                .organizations_filter_include
                .iter()
                .map(|org| format!("organization:{}", org))
                .collect::<Vec<_>>()
                .join(" OR ");
            vec![term]
        } else {
            self.organizations_filter_exclude
                .iter()
                .map(|org| format!("-organization:{}", org))
                .collect()
        }
    }

    pub fn with_force_all(mut self) -> Self {
        self.force_all = true;
        self
    }
}

// =============================================================================
// Sources file (harvest.toml)
// =============================================================================

/// Default enabled status when not specified in configuration.
fn default_enabled() -> bool {
    true
}

/// Root structure of `harvest.toml`.
///
/// # Example
///
/// ```toml
/// [[sources]]
/// id = "b7a1f0d4-source-package"
/// url = "https://data.example.gov"
/// title = "Example DKAN"
///
/// [sources.config]
/// remote_orgs = "create"
/// default_tags = ["dkan"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl SourcesConfig {
    /// Returns only enabled sources.
    pub fn enabled_sources(&self) -> Vec<&SourceEntry> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Finds a source by id, or by title (case-insensitive).
    pub fn find(&self, key: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|s| s.id == key || s.title.eq_ignore_ascii_case(key))
    }
}

/// One harvest source in the sources file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Id of the harvest source package in the local catalog.
    pub id: String,
    /// Base URL of the remote DKAN instance.
    pub url: String,
    pub title: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: SourceConfig,
}

impl SourceEntry {
    /// Validates the entry and turns it into a [`HarvestSource`].
    pub fn to_source(&self) -> Result<HarvestSource, AppError> {
        url::Url::parse(&self.url)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        self.config.validate()?;
        Ok(HarvestSource {
            id: self.id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            config: self.config.clone(),
        })
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "harvest.toml";

/// Returns the default configuration directory: `~/.config/dkan-harvest/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dkan-harvest"))
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# DKAN harvest sources
#
# Usage:
#   dkan-harvest run                  # gather, fetch and import every enabled source
#   dkan-harvest run --source <id>    # a single source
#
# `id` is the id of the harvest source package in the local CKAN instance.
# Its organization is used for datasets whose remote organization is not kept.

# [[sources]]
# id = "00000000-0000-0000-0000-000000000000"
# url = "https://data.example.gov"
# title = "Example DKAN"
#
# [sources.config]
# remote_orgs = "only_local"      # ignore | only_local | create
# remote_groups = "ignore"
# default_tags = ["dkan"]
# force_all = false
"#;

/// Loads the sources file.
///
/// Returns `Ok(None)` when no file exists at the default path; a commented
/// template is written there so the user has something to edit. A missing
/// file at an explicit path is an error.
pub fn load_sources_config(path: Option<PathBuf>) -> Result<Option<SourcesConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            match create_default_config(&config_path) {
                Ok(()) => tracing::info!(
                    path = %config_path.display(),
                    "Created sources template, add a [[sources]] entry to start harvesting"
                ),
                Err(e) => tracing::warn!(error = %e, "Could not create sources template"),
            }
            return Ok(None);
        }
        return Err(AppError::ConfigError(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: SourcesConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
}
