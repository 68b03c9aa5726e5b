//! Test utilities and mock implementations for integration tests.
//!
//! Provides in-memory implementations of the collaborator traits for testing
//! `GatherService` and `ImportService` in isolation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dkan_harvest_core::models::{ErrorStage, HarvestObject, PreviousJob};
use dkan_harvest_core::traits::{
    Action, ActionApi, ContentFetcher, HarvestStore, License, LicenseRegistry,
};
use dkan_harvest_core::{AppError, HarvestJob, HarvestSource, SourceConfig};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

pub const REMOTE_URL: &str = "https://remote.example.org";
pub const SOURCE_ID: &str = "source-package";
pub const SOURCE_ORG: &str = "source-org-id";

/// Creates a job for a source pointing at [`REMOTE_URL`].
pub fn job(config: SourceConfig) -> HarvestJob {
    HarvestJob::new(HarvestSource {
        id: SOURCE_ID.to_string(),
        url: format!("{}/", REMOTE_URL),
        title: "Remote DKAN".to_string(),
        config,
    })
}

/// A remote DKAN package record with one CSV resource.
pub fn remote_package(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "private": true,
        "metadata_modified": "2020-01-02T03:04:05.000000",
        "resources": [{
            "title": format!("{} data", title),
            "mimetype": "text/csv",
            "size": "1.5 MB",
            "created": "Wed 02/01/20 - 03:04",
            "revision_id": "rev"
        }]
    })
}

// =============================================================================
// MockRemote
// =============================================================================

/// In-memory remote DKAN instance behind a [`ContentFetcher`].
///
/// Serves `current_package_list_with_resources` pages (from `modified` when
/// the search carries a `metadata_modified` filter) and `group_show` /
/// `organization_show` records.
#[derive(Clone, Default)]
pub struct MockRemote {
    packages: Arc<Vec<Value>>,
    /// `None` makes incremental searches fail.
    modified: Arc<Option<Vec<Value>>>,
    groups: Arc<HashMap<String, Value>>,
    organizations: Arc<HashMap<String, Value>>,
    fail_all: bool,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockRemote {
    pub fn new(packages: Vec<Value>) -> Self {
        Self {
            packages: Arc::new(packages),
            modified: Arc::new(Some(Vec::new())),
            ..Default::default()
        }
    }

    /// Remote that refuses every request.
    pub fn unreachable() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    pub fn with_modified(mut self, modified: Option<Vec<Value>>) -> Self {
        self.modified = Arc::new(modified);
        self
    }

    pub fn with_group(mut self, name: &str, record: Value) -> Self {
        Arc::make_mut(&mut self.groups).insert(name.to_string(), record);
        self
    }

    pub fn with_organization(mut self, name: &str, record: Value) -> Self {
        Arc::make_mut(&mut self.organizations).insert(name.to_string(), record);
        self
    }

    pub fn search_requests(&self) -> Vec<Url> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter(|u| u.path().ends_with("current_package_list_with_resources"))
            .collect()
    }

    fn page(&self, url: &Url) -> Vec<u8> {
        let param = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };
        let limit: usize = param("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
        let offset: usize = param("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let incremental = param("fq").is_some_and(|fq| fq.contains("metadata_modified"));

        let source: &[Value] = if incremental {
            match &*self.modified {
                Some(modified) => modified,
                None => return b"<html>Search is down</html>".to_vec(),
            }
        } else {
            &self.packages
        };

        let page: Vec<Value> = source.iter().skip(offset).take(limit).cloned().collect();
        json!({"success": true, "result": page}).to_string().into_bytes()
    }

    fn show(records: &HashMap<String, Value>, url: &Url) -> Result<Vec<u8>, AppError> {
        let id = url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        match records.get(&id) {
            Some(record) => Ok(json!({"success": true, "result": record})
                .to_string()
                .into_bytes()),
            None => Err(AppError::Transport(format!("HTTP 404 for {}", url))),
        }
    }
}

impl ContentFetcher for MockRemote {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.fail_all {
            return Err(AppError::Transport("connection refused".to_string()));
        }

        let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        let path = parsed.path();
        if path.ends_with("current_package_list_with_resources") {
            Ok(self.page(&parsed))
        } else if path.ends_with("organization_show") {
            Self::show(&self.organizations, &parsed)
        } else if path.ends_with("group_show") {
            Self::show(&self.groups, &parsed)
        } else {
            Err(AppError::Transport(format!("HTTP 404 for {}", url)))
        }
    }
}

// =============================================================================
// MockActionApi
// =============================================================================

#[derive(Default)]
struct LocalState {
    packages: HashMap<String, Value>,
    groups: HashMap<String, Value>,
    organizations: HashMap<String, Value>,
    invalid_packages: HashSet<String>,
    calls: Vec<(Action, Value)>,
}

/// In-memory local CKAN action API.
#[derive(Clone, Default)]
pub struct MockActionApi {
    state: Arc<Mutex<LocalState>>,
}

impl MockActionApi {
    /// API whose catalog already holds the harvest source package.
    pub fn new() -> Self {
        let api = Self::default();
        api.add_package(json!({
            "id": SOURCE_ID,
            "name": "remote-dkan",
            "type": "harvest",
            "owner_org": SOURCE_ORG
        }));
        api
    }

    pub fn add_package(&self, package: Value) {
        let id = package["id"].as_str().unwrap_or_default().to_string();
        self.state.lock().unwrap().packages.insert(id, package);
    }

    pub fn add_group(&self, id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(id.to_string(), json!({"id": id, "name": name}));
    }

    pub fn add_organization(&self, id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .organizations
            .insert(id.to_string(), json!({"id": id, "name": name}));
    }

    /// Makes create/update of package `id` fail validation.
    pub fn reject_package(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .invalid_packages
            .insert(id.to_string());
    }

    pub fn package(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().packages.get(id).cloned()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    pub fn has_organization(&self, id: &str) -> bool {
        self.state.lock().unwrap().organizations.contains_key(id)
    }

    /// Number of calls made for `action`.
    pub fn calls(&self, action: Action) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(a, _)| *a == action)
            .count()
    }

    /// Payload of the last call made for `action`.
    pub fn last_payload(&self, action: Action) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .rev()
            .find(|(a, _)| *a == action)
            .map(|(_, data)| data.clone())
    }
}

fn find_by_id_or_name(records: &HashMap<String, Value>, key: &str) -> Option<Value> {
    records.get(key).cloned().or_else(|| {
        records
            .values()
            .find(|r| r.get("name").and_then(Value::as_str) == Some(key))
            .cloned()
    })
}

impl ActionApi for MockActionApi {
    async fn invoke(&self, action: Action, data: Value) -> Result<Value, AppError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((action, data.clone()));
        let key = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match action {
            Action::PackageShow => state
                .packages
                .get(&key)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("package {}", key))),
            Action::PackageCreate | Action::PackageUpdate => {
                if state.invalid_packages.contains(&key) {
                    return Err(AppError::Validation(format!("{{\"name\": [\"invalid\"]}} {}", key)));
                }
                if action == Action::PackageUpdate && !state.packages.contains_key(&key) {
                    return Err(AppError::NotFound(format!("package {}", key)));
                }
                state.packages.insert(key, data.clone());
                Ok(data)
            }
            Action::GroupShow => find_by_id_or_name(&state.groups, &key)
                .ok_or_else(|| AppError::NotFound(format!("group {}", key))),
            Action::OrganizationShow => find_by_id_or_name(&state.organizations, &key)
                .ok_or_else(|| AppError::NotFound(format!("organization {}", key))),
            Action::GroupCreate => {
                state.groups.insert(key, data.clone());
                Ok(data)
            }
            Action::OrganizationCreate => {
                state.organizations.insert(key, data.clone());
                Ok(data)
            }
        }
    }
}

// =============================================================================
// MockHarvestStore
// =============================================================================

#[derive(Default)]
struct StoreState {
    objects: Vec<HarvestObject>,
    previous_job: Option<PreviousJob>,
    gather_errors: Vec<(Uuid, String)>,
    object_errors: Vec<(Uuid, String, ErrorStage)>,
    imported: HashMap<Uuid, String>,
    failed: HashSet<Uuid>,
}

/// In-memory harvest store.
#[derive(Clone, Default)]
pub struct MockHarvestStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockHarvestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store remembering an error-free job started at `gather_started`.
    pub fn with_previous_job(gather_started: chrono::DateTime<chrono::Utc>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().previous_job = Some(PreviousJob {
            id: Uuid::new_v4(),
            gather_started,
        });
        store
    }

    pub fn objects(&self) -> Vec<HarvestObject> {
        self.state.lock().unwrap().objects.clone()
    }

    pub fn gather_errors(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .gather_errors
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn object_errors(&self, object_id: Uuid) -> Vec<(String, ErrorStage)> {
        self.state
            .lock()
            .unwrap()
            .object_errors
            .iter()
            .filter(|(id, _, _)| *id == object_id)
            .map(|(_, msg, stage)| (msg.clone(), *stage))
            .collect()
    }

    pub fn imported_package(&self, object_id: Uuid) -> Option<String> {
        self.state.lock().unwrap().imported.get(&object_id).cloned()
    }

    pub fn is_failed(&self, object_id: Uuid) -> bool {
        self.state.lock().unwrap().failed.contains(&object_id)
    }
}

impl HarvestStore for MockHarvestStore {
    async fn create_object(&self, object: &HarvestObject) -> Result<(), AppError> {
        self.state.lock().unwrap().objects.push(object.clone());
        Ok(())
    }

    async fn last_error_free_job(
        &self,
        _source_id: &str,
        _current_job: Uuid,
    ) -> Result<Option<PreviousJob>, AppError> {
        Ok(self.state.lock().unwrap().previous_job)
    }

    async fn save_gather_error(&self, job_id: Uuid, message: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .gather_errors
            .push((job_id, message.to_string()));
        Ok(())
    }

    async fn save_object_error(
        &self,
        object_id: Uuid,
        message: &str,
        stage: ErrorStage,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .object_errors
            .push((object_id, message.to_string(), stage));
        Ok(())
    }

    async fn mark_object_imported(&self, object_id: Uuid, package_id: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .imported
            .insert(object_id, package_id.to_string());
        Ok(())
    }

    async fn mark_object_failed(&self, object_id: Uuid) -> Result<(), AppError> {
        self.state.lock().unwrap().failed.insert(object_id);
        Ok(())
    }
}

// =============================================================================
// MockLicenses
// =============================================================================

#[derive(Clone)]
pub struct MockLicenses;

impl LicenseRegistry for MockLicenses {
    fn licenses(&self) -> Vec<License> {
        vec![
            License::new("cc-by", "Creative Commons Attribution"),
            License::new("odc-pddl", "Open Data Commons Public Domain Dedication and License (PDDL)"),
        ]
    }
}
