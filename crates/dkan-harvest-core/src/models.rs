//! Domain models for remote packages, normalized packages and harvest bookkeeping.
//!
//! Remote records are deserialized into [`RemotePackage`]: fields the pipeline
//! reasons about are explicit, everything else is kept in a flattened map and
//! passed through unchanged. The converter produces a [`NormalizedPackage`],
//! which is what gets serialized into a [`HarvestObject`] during gather.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::error::AppError;

/// Raw package record as returned by a DKAN `current_package_list_with_resources` page.
///
/// Only `id` is required: it is the join key between the remote and the local
/// catalog. Fields whose JSON shape varies between DKAN versions (`private`,
/// `extras`, `groups`, `tags`) are kept as raw [`Value`]s and interpreted by the
/// converter.
///
/// # Examples
///
/// ```
/// use dkan_harvest_core::models::RemotePackage;
///
/// let json = r#"{
///     "id": "3f6c2a",
///     "title": "Air Quality",
///     "resources": [{"title": "Readings", "mimetype": "text/csv"}],
///     "organization": {"title": "Environment"}
/// }"#;
///
/// let package: RemotePackage = serde_json::from_str(json).unwrap();
/// assert_eq!(package.id, "3f6c2a");
/// assert!(package.name.is_none());
/// assert!(package.other.contains_key("organization"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePackage {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// DKAN's human-readable description; CKAN calls it `notes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<RemoteResource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_modified: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    /// All other fields returned by the remote.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Resource entry nested in a [`RemotePackage`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Either a number or a string such as `"12.5 MB"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_type: Option<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl RemoteResource {
    /// Display name: DKAN uses `title`, CKAN uses `name`.
    pub fn display_name(&self) -> Option<&str> {
        self.title.as_deref().or(self.name.as_deref())
    }
}

/// A tag in CKAN form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A reference to a group or organization, by id and/or name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl GroupRef {
    /// Canonical local reference with both id and name set.
    pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            title: None,
        }
    }

    /// Best identifier for lookups: id first, then name.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().or(self.name.as_deref())
    }
}

/// A CKAN extra: one key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extra {
    pub key: String,
    pub value: Value,
}

impl Extra {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Package in the CKAN metadata schema, ready to be stored as a harvest object.
///
/// Invariants established by the converter: `name` is set, `private` is false,
/// `resources` is non-empty and `extras` is always a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPackage {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_title: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_modified: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub groups: Vec<GroupRef>,
    #[serde(default)]
    pub extras: Vec<Extra>,
    pub resources: Vec<NormalizedResource>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl NormalizedPackage {
    /// Returns the extra with the given key, if any.
    pub fn extra(&self, key: &str) -> Option<&Extra> {
        self.extras.iter().find(|e| e.key == key)
    }

    /// True for packages that are themselves harvest sources on the remote.
    pub fn is_harvest_source(&self) -> bool {
        self.package_type.as_deref() == Some("harvest")
    }
}

/// Resource in the CKAN metadata schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    pub created: String,
    pub last_modified: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// Harvest bookkeeping
// =============================================================================

/// A configured remote catalog that is harvested into the local instance.
///
/// `id` is the id of the harvest source package in the local catalog; its
/// `owner_org` is the fallback organization for imported datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSource {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub config: SourceConfig,
}

impl HarvestSource {
    /// Source URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Status of a harvest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, gather not started yet.
    New,
    /// Gather or import in progress.
    Running,
    /// All stages done (with or without errors).
    Finished,
}

impl JobStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
        }
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobStatus::New),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            _ => Err(AppError::Generic(format!("invalid job status: {}", s))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of gather → fetch → import against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub source: HarvestSource,
    pub status: JobStatus,
    pub gather_started: DateTime<Utc>,
    pub gather_finished: Option<DateTime<Utc>>,
}

impl HarvestJob {
    /// Creates a new job for `source`, starting now.
    pub fn new(source: HarvestSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            status: JobStatus::New,
            gather_started: Utc::now(),
            gather_finished: None,
        }
    }
}

/// The part of an earlier job the gather stage needs for incremental search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousJob {
    pub id: Uuid,
    pub gather_started: DateTime<Utc>,
}

/// Pipeline stage an object error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Fetch,
    Import,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Fetch => "fetch",
            ErrorStage::Import => "import",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Import state of a harvest object, tracked beside the immutable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Gathered,
    Imported,
    Failed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Gathered => "gathered",
            ObjectState::Imported => "imported",
            ObjectState::Failed => "failed",
        }
    }
}

impl FromStr for ObjectState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gathered" => Ok(ObjectState::Gathered),
            "imported" => Ok(ObjectState::Imported),
            "failed" => Ok(ObjectState::Failed),
            _ => Err(AppError::Generic(format!("invalid object state: {}", s))),
        }
    }
}

/// One pending dataset produced by gather and consumed by import.
///
/// Objects are never mutated: re-harvesting the same `guid` creates a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: Uuid,
    /// Remote dataset id.
    pub guid: String,
    pub job_id: Uuid,
    /// Serialized [`NormalizedPackage`].
    pub content: Option<String>,
    pub gathered_at: DateTime<Utc>,
}

impl HarvestObject {
    pub fn new(job_id: Uuid, guid: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            guid: guid.into(),
            job_id,
            content: Some(content.into()),
            gathered_at: Utc::now(),
        }
    }

    /// Deserializes the payload, `None` when the object has no content.
    pub fn package(&self) -> Result<Option<NormalizedPackage>, AppError> {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(serde_json::from_str)
            .transpose()
            .map_err(AppError::from)
    }
}
