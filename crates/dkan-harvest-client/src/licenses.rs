//! License registry loaded from the local CKAN instance.

use std::sync::Arc;

use dkan_harvest_core::error::AppError;
use dkan_harvest_core::traits::{License, LicenseRegistry};

use crate::ckan::CkanActionClient;

/// Snapshot of the local license list, taken once per run.
#[derive(Debug, Clone, Default)]
pub struct LicenseList {
    licenses: Arc<Vec<License>>,
}

impl LicenseList {
    pub fn new(licenses: Vec<License>) -> Self {
        Self {
            licenses: Arc::new(licenses),
        }
    }

    /// Loads the registry through the `license_list` action.
    pub async fn load(ckan: &CkanActionClient) -> Result<Self, AppError> {
        let licenses = ckan.license_list().await?;
        tracing::debug!(count = licenses.len(), "Loaded local licenses");
        Ok(Self::new(licenses))
    }

    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }
}

impl LicenseRegistry for LicenseList {
    fn licenses(&self) -> Vec<License> {
        self.licenses.as_ref().clone()
    }
}
