//! Import stage: reconcile a harvested package with the local catalog.
//!
//! For each harvest object the importer:
//!
//! 1. merges the source's default tags (and cleans tag names if configured)
//! 2. resolves remote groups against local groups (`remote_groups` policy)
//! 3. resolves the remote organization (`remote_orgs` policy), falling back to
//!    the organization owning the harvest source
//! 4. adds default groups and default extras
//! 5. creates the local package, or updates it when the harvested copy is newer
//!
//! Local groups and organizations are only ever created, never modified.
//! Every failure is recorded against the object; the job carries on.

use serde_json::{Map, Value, json};
use url::Url;

use crate::config::{RemotePolicy, SourceConfig};
use crate::error::AppError;
use crate::models::{
    ErrorStage, Extra, GroupRef, HarvestJob, HarvestObject, HarvestSource, NormalizedPackage, Tag,
};
use crate::munge::munge_tag;
use crate::stats::ImportOutcome;
use crate::traits::{Action, ActionApi, ContentFetcher, HarvestStore};

/// Keys of a remote group record that must not be sent to `group_create`.
const GROUP_KEYS_TO_STRIP: [&str; 7] = [
    "packages",
    "created",
    "users",
    "groups",
    "tags",
    "extras",
    "display_name",
];

/// Service running the import stage.
///
/// # Type Parameters
///
/// * `A` - Local action API
/// * `F` - Content fetcher for the remote group/organization records
/// * `S` - Harvest store for object state and errors
pub struct ImportService<A, F, S>
where
    A: ActionApi,
    F: ContentFetcher,
    S: HarvestStore,
{
    api: A,
    remote: F,
    store: S,
}

impl<A, F, S> Clone for ImportService<A, F, S>
where
    A: ActionApi,
    F: ContentFetcher,
    S: HarvestStore,
{
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            remote: self.remote.clone(),
            store: self.store.clone(),
        }
    }
}

impl<A, F, S> ImportService<A, F, S>
where
    A: ActionApi,
    F: ContentFetcher,
    S: HarvestStore,
{
    pub fn new(api: A, remote: F, store: S) -> Self {
        Self { api, remote, store }
    }

    /// Imports one harvest object.
    ///
    /// Only store failures are returned as errors. Anything else that goes
    /// wrong is recorded against the object and reported as
    /// [`ImportOutcome::Failed`].
    pub async fn import(
        &self,
        object: &HarvestObject,
        job: &HarvestJob,
    ) -> Result<ImportOutcome, AppError> {
        let package = match object.package() {
            Ok(Some(package)) => package,
            Ok(None) => {
                return self
                    .fail(object, format!("Empty content for object {}", object.id))
                    .await;
            }
            Err(e) => {
                return self
                    .fail(object, format!("Invalid content for object {}: {}", object.id, e))
                    .await;
            }
        };

        if package.is_harvest_source() {
            tracing::info!(guid = %object.guid, "Skipping remote harvest source package");
            return Ok(ImportOutcome::Skipped);
        }

        match self.import_package(package, object, job).await {
            Ok((outcome, package_id)) => {
                self.store
                    .mark_object_imported(object.id, &package_id)
                    .await?;
                tracing::info!(
                    guid = %object.guid,
                    package = %package_id,
                    outcome = outcome.as_str(),
                    "Imported package"
                );
                Ok(outcome)
            }
            Err(AppError::Validation(msg)) => {
                self.fail(
                    object,
                    format!("Invalid package with GUID {}: {}", object.guid, msg),
                )
                .await
            }
            Err(e) => {
                self.fail(
                    object,
                    format!("Unable to import package with GUID {}: {}", object.guid, e),
                )
                .await
            }
        }
    }

    async fn fail(&self, object: &HarvestObject, message: String) -> Result<ImportOutcome, AppError> {
        tracing::error!(object = %object.id, guid = %object.guid, "{}", message);
        self.store
            .save_object_error(object.id, &message, ErrorStage::Import)
            .await?;
        self.store.mark_object_failed(object.id).await?;
        Ok(ImportOutcome::Failed)
    }

    async fn import_package(
        &self,
        mut package: NormalizedPackage,
        object: &HarvestObject,
        job: &HarvestJob,
    ) -> Result<(ImportOutcome, String), AppError> {
        let source = &job.source;
        let config = &source.config;

        merge_tags(&mut package, config);

        let remote_groups = std::mem::take(&mut package.groups);
        package.groups = self.resolve_groups(remote_groups, source).await?;

        let local_org = self.source_organization(source).await?;
        package.owner_org = self
            .resolve_organization(package.owner_org.take(), source)
            .await?
            .or(local_org);

        self.add_default_groups(&mut package, config).await?;
        merge_default_extras(&mut package, object, job);

        for resource in &mut package.resources {
            resource.other.remove("revision_id");
            resource.other.remove("url_type");
        }

        self.create_or_update(package, object).await
    }

    // =========================================================================
    // Groups
    // =========================================================================

    async fn resolve_groups(
        &self,
        groups: Vec<GroupRef>,
        source: &HarvestSource,
    ) -> Result<Vec<GroupRef>, AppError> {
        let policy = source.config.remote_groups;
        if policy == RemotePolicy::Ignore {
            return Ok(Vec::new());
        }

        let mut validated: Vec<GroupRef> = Vec::new();
        for group in groups {
            if let Some(local) = self.find_local_group(&group).await? {
                push_unique(&mut validated, local);
                continue;
            }

            tracing::info!(group = ?group.identifier(), "Group is not available locally");
            if policy != RemotePolicy::Create {
                continue;
            }

            let Some(remote_key) = group.name.as_deref().or(group.id.as_deref()) else {
                continue;
            };
            let mut record = match self.remote_show(source, "group_show", remote_key).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(group = remote_key, error = %e, "Could not get remote group");
                    continue;
                }
            };
            for key in GROUP_KEYS_TO_STRIP {
                record.remove(key);
            }

            let created = self
                .api
                .invoke(Action::GroupCreate, Value::Object(record.clone()))
                .await?;
            tracing::info!(group = remote_key, "Group has been newly created");
            push_unique(&mut validated, local_ref(&created, &record));
        }

        Ok(validated)
    }

    /// Looks a group up by id, then by name.
    async fn find_local_group(&self, group: &GroupRef) -> Result<Option<GroupRef>, AppError> {
        for key in [group.id.as_deref(), group.name.as_deref()].into_iter().flatten() {
            match self.api.invoke(Action::GroupShow, json!({ "id": key })).await {
                Ok(found) => return Ok(Some(local_ref(&found, &Map::new()))),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn add_default_groups(
        &self,
        package: &mut NormalizedPackage,
        config: &SourceConfig,
    ) -> Result<(), AppError> {
        for name in &config.default_groups {
            match self.api.invoke(Action::GroupShow, json!({ "id": name })).await {
                Ok(found) => push_unique(&mut package.groups, local_ref(&found, &Map::new())),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(group = %name, "Default group does not exist locally");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Organization
    // =========================================================================

    /// Organization owning the harvest source package in the local catalog.
    async fn source_organization(&self, source: &HarvestSource) -> Result<Option<String>, AppError> {
        let dataset = self
            .api
            .invoke(Action::PackageShow, json!({ "id": source.id }))
            .await?;
        Ok(dataset
            .get("owner_org")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Returns the local id of the remote organization, or `None` when the
    /// source organization should be used instead.
    async fn resolve_organization(
        &self,
        remote_org: Option<String>,
        source: &HarvestSource,
    ) -> Result<Option<String>, AppError> {
        let policy = source.config.remote_orgs;
        if policy == RemotePolicy::Ignore {
            return Ok(None);
        }
        let Some(remote_org) = remote_org.filter(|o| !o.is_empty()) else {
            return Ok(None);
        };

        match self
            .api
            .invoke(Action::OrganizationShow, json!({ "id": remote_org }))
            .await
        {
            Ok(org) => return Ok(org.get("id").and_then(Value::as_str).map(str::to_string)),
            Err(e) if e.is_not_found() => {
                tracing::info!(organization = %remote_org, "Organization is not available locally");
            }
            Err(e) => return Err(e),
        }

        if policy != RemotePolicy::Create {
            return Ok(None);
        }

        match self.create_organization(&remote_org, source).await {
            Ok(id) => {
                tracing::info!(organization = %remote_org, "Organization has been newly created");
                Ok(id)
            }
            Err(e @ (AppError::RemoteResource(_) | AppError::Validation(_))) => {
                tracing::error!(organization = %remote_org, error = %e, "Could not get remote org");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_organization(
        &self,
        remote_org: &str,
        source: &HarvestSource,
    ) -> Result<Option<String>, AppError> {
        // Older remotes expose organizations only as groups.
        let mut record = match self.remote_show(source, "organization_show", remote_org).await {
            Ok(record) => record,
            Err(_) => self.remote_show(source, "group_show", remote_org).await?,
        };
        for key in GROUP_KEYS_TO_STRIP.iter().chain(["type"].iter()) {
            record.remove(*key);
        }

        let created = self
            .api
            .invoke(Action::OrganizationCreate, Value::Object(record.clone()))
            .await?;
        Ok(local_ref(&created, &record).id)
    }

    /// Fetches `action` for `id` from the remote action API.
    async fn remote_show(
        &self,
        source: &HarvestSource,
        action: &str,
        id: &str,
    ) -> Result<Map<String, Value>, AppError> {
        let endpoint = format!("{}/api/3/action/{}", source.base_url(), action);
        let mut url = Url::parse(&endpoint)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        url.query_pairs_mut().append_pair("id", id);

        let content = self
            .remote
            .fetch(url.as_str())
            .await
            .map_err(|e| AppError::RemoteResource(format!("{}: {}", url, e)))?;
        let response: Value = serde_json::from_slice(&content)
            .map_err(|e| AppError::RemoteResource(format!("{}: not JSON: {}", url, e)))?;

        if response.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(AppError::RemoteResource(format!("{}: request failed", url)));
        }
        match response {
            Value::Object(mut map) => match map.remove("result") {
                Some(Value::Object(record)) => Ok(record),
                _ => Err(AppError::RemoteResource(format!("{}: no result", url))),
            },
            _ => Err(AppError::RemoteResource(format!("{}: no result", url))),
        }
    }

    // =========================================================================
    // Create or update
    // =========================================================================

    async fn create_or_update(
        &self,
        mut package: NormalizedPackage,
        object: &HarvestObject,
    ) -> Result<(ImportOutcome, String), AppError> {
        let existing = match self
            .api
            .invoke(Action::PackageShow, json!({ "id": package.id }))
            .await
        {
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let Some(existing) = existing else {
            tracing::info!(guid = %object.guid, "Package does not exist locally, creating it");
            let created = self
                .api
                .invoke(Action::PackageCreate, serde_json::to_value(&package)?)
                .await?;
            return Ok((ImportOutcome::Created, result_id(&created, &package.id)));
        };

        // The local name may differ from the derived one, keep it.
        if let Some(name) = existing.get("name").and_then(Value::as_str) {
            package.name = name.to_string();
        }

        let local_modified = existing.get("metadata_modified").and_then(Value::as_str);
        if !is_newer(package.metadata_modified.as_deref(), local_modified) {
            tracing::info!(guid = %object.guid, "No changes to package, skipping");
            return Ok((ImportOutcome::Unchanged, result_id(&existing, &package.id)));
        }

        tracing::info!(guid = %object.guid, "Package exists and needs to be updated");
        let updated = self
            .api
            .invoke(Action::PackageUpdate, serde_json::to_value(&package)?)
            .await?;
        Ok((ImportOutcome::Updated, result_id(&updated, &package.id)))
    }
}

/// True when the harvested copy should replace the local one.
///
/// Timestamps are ISO-8601 strings, which order lexicographically.
fn is_newer(incoming: Option<&str>, local: Option<&str>) -> bool {
    match (incoming, local) {
        (None, _) | (_, None) => true,
        (Some(incoming), Some(local)) => incoming > local,
    }
}

fn result_id(result: &Value, fallback: &str) -> String {
    result
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// Builds `{id, name}` from an action result, filling gaps from `record`.
fn local_ref(result: &Value, record: &Map<String, Value>) -> GroupRef {
    let field = |key: &str| {
        result
            .get(key)
            .or_else(|| record.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    GroupRef {
        id: field("id"),
        name: field("name"),
        title: None,
    }
}

fn push_unique(groups: &mut Vec<GroupRef>, group: GroupRef) {
    let duplicate = groups.iter().any(|g| match (&g.id, &group.id) {
        (Some(a), Some(b)) => a == b,
        _ => g.name.is_some() && g.name == group.name,
    });
    if !duplicate {
        groups.push(group);
    }
}

fn merge_tags(package: &mut NormalizedPackage, config: &SourceConfig) {
    for name in &config.default_tags {
        if !package.tags.iter().any(|t| &t.name == name) {
            package.tags.push(Tag::new(name.clone()));
        }
    }

    if config.clean_tags {
        let mut cleaned: Vec<Tag> = Vec::with_capacity(package.tags.len());
        for tag in package.tags.drain(..) {
            let tag = Tag::new(munge_tag(&tag.name));
            if !cleaned.contains(&tag) {
                cleaned.push(tag);
            }
        }
        package.tags = cleaned;
    }
}

fn merge_default_extras(package: &mut NormalizedPackage, object: &HarvestObject, job: &HarvestJob) {
    let config = &job.source.config;
    for (key, value) in &config.default_extras {
        if let Some(pos) = package.extras.iter().position(|e| &e.key == key) {
            if !config.override_extras {
                continue;
            }
            package.extras.remove(pos);
        }

        let value = match value {
            Value::String(template) => Value::String(expand_placeholders(template, package, object, job)),
            other => other.clone(),
        };
        package.extras.push(Extra::new(key.clone(), value));
    }
}

/// Substitutes the `{harvest_*}` and `{dataset_id}` placeholders.
fn expand_placeholders(
    template: &str,
    package: &NormalizedPackage,
    object: &HarvestObject,
    job: &HarvestJob,
) -> String {
    let source = &job.source;
    [
        ("{harvest_source_id}", source.id.clone()),
        ("{harvest_source_url}", source.url.trim_matches('/').to_string()),
        ("{harvest_source_title}", source.title.clone()),
        ("{harvest_job_id}", job.id.to_string()),
        ("{harvest_object_id}", object.id.to_string()),
        ("{dataset_id}", package.id.clone()),
    ]
    .iter()
    .fold(template.to_string(), |acc, (placeholder, value)| {
        acc.replace(placeholder, value)
    })
}
