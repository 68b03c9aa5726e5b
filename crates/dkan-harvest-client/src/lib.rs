//! DKAN Harvest Client - HTTP implementations of the pipeline collaborators
//!
//! This crate provides:
//!
//! - [`fetcher`] - GET client for remote DKAN instances ([`ContentFetcher`])
//! - [`ckan`] - client for the local CKAN action API ([`ActionApi`])
//! - [`licenses`] - the local license list ([`LicenseRegistry`])
//!
//! [`ContentFetcher`]: dkan_harvest_core::traits::ContentFetcher
//! [`ActionApi`]: dkan_harvest_core::traits::ActionApi
//! [`LicenseRegistry`]: dkan_harvest_core::traits::LicenseRegistry

pub mod ckan;
pub mod fetcher;
pub mod licenses;

pub use ckan::CkanActionClient;
pub use fetcher::HttpFetcher;
pub use licenses::LicenseList;
