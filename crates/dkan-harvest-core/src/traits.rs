//! Trait definitions for the collaborators of the harvest pipeline.
//!
//! The pipeline never talks to the network or the database directly. It
//! consumes four collaborators:
//!
//! - [`ContentFetcher`]: GET a URL, return the body bytes
//! - [`ActionApi`]: call an action of the local CKAN action API
//! - [`HarvestStore`]: persist harvest objects and their errors
//! - [`LicenseRegistry`]: the licenses known to the local instance
//!
//! Concrete implementations live in `dkan-harvest-client` and
//! `dkan-harvest-db`; tests use in-memory mocks.
//!
//! # Example
//!
//! ```
//! use dkan_harvest_core::traits::{Action, ActionApi};
//! use dkan_harvest_core::AppError;
//! use serde_json::json;
//!
//! async fn local_group_exists<A: ActionApi>(api: &A, name: &str) -> Result<bool, AppError> {
//!     match api.invoke(Action::GroupShow, json!({"id": name})).await {
//!         Ok(_) => Ok(true),
//!         Err(e) if e.is_not_found() => Ok(false),
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::AppError;
use crate::models::{ErrorStage, HarvestObject, PreviousJob};

/// Retrieves raw content from a URL.
pub trait ContentFetcher: Send + Sync + Clone {
    /// Fetches `url` and returns the response body.
    ///
    /// Network failures and non-success statuses are reported as
    /// [`AppError::Transport`]. Implementations own their timeout.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Actions of the local action API used by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    PackageShow,
    PackageCreate,
    PackageUpdate,
    GroupShow,
    GroupCreate,
    OrganizationShow,
    OrganizationCreate,
}

impl Action {
    /// Action name as it appears in `/api/3/action/{name}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::PackageShow => "package_show",
            Action::PackageCreate => "package_create",
            Action::PackageUpdate => "package_update",
            Action::GroupShow => "group_show",
            Action::GroupCreate => "group_create",
            Action::OrganizationShow => "organization_show",
            Action::OrganizationCreate => "organization_create",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatcher for the local CKAN action API.
///
/// Implementations carry their own user context (API token). Lookups of
/// missing entities fail with [`AppError::NotFound`]; rejected payloads fail
/// with [`AppError::Validation`].
pub trait ActionApi: Send + Sync + Clone {
    /// Invokes `action` with `data` and returns the action's `result` value.
    fn invoke(
        &self,
        action: Action,
        data: Value,
    ) -> impl Future<Output = Result<Value, AppError>> + Send;
}

/// Persistence for harvest jobs, objects and their errors.
pub trait HarvestStore: Send + Sync + Clone {
    /// Stores a new harvest object.
    fn create_object(
        &self,
        object: &HarvestObject,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Returns the most recent job of `source_id` that finished without any
    /// gather or object error, ignoring `current_job`.
    fn last_error_free_job(
        &self,
        source_id: &str,
        current_job: Uuid,
    ) -> impl Future<Output = Result<Option<PreviousJob>, AppError>> + Send;

    /// Records an error against a job's gather stage.
    fn save_gather_error(
        &self,
        job_id: Uuid,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Records an error against a single harvest object.
    fn save_object_error(
        &self,
        object_id: Uuid,
        message: &str,
        stage: ErrorStage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks an object as imported into the local package `package_id`.
    fn mark_object_imported(
        &self,
        object_id: Uuid,
        package_id: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks an object as failed.
    fn mark_object_failed(&self, object_id: Uuid)
    -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A license known to the local instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub title: String,
}

impl License {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Source of the local license list.
pub trait LicenseRegistry: Send + Sync + Clone {
    fn licenses(&self) -> Vec<License>;
}
