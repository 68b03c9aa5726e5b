//! DKAN Harvest Core - Domain types, conversion and harvest services.
//!
//! This crate provides the harvest pipeline that moves dataset metadata from a
//! remote DKAN catalog into a local CKAN instance:
//!
//! - **Search**: [`PackageSearcher`] pages through the remote catalog and
//!   drops records seen twice while the remote changes underneath
//! - **Conversion**: [`DkanConverter`] rewrites DKAN conventions into the CKAN
//!   schema, using [`DateNormalizer`] for resource dates
//! - **Services**: [`GatherService`] (gather and fetch stages) and
//!   [`ImportService`] (import stage)
//! - **Traits**: [`ContentFetcher`], [`ActionApi`], [`HarvestStore`] and
//!   [`LicenseRegistry`] for dependency injection
//!
//! # Architecture
//!
//! Services are generic over the collaborator traits, so the crate does no
//! I/O of its own. `dkan-harvest-client` provides the HTTP implementations,
//! `dkan-harvest-db` the PostgreSQL store and `dkan-harvest-cli` drives the
//! stages.
//!
//! # Example
//!
//! ```ignore
//! use dkan_harvest_core::{GatherOutcome, GatherService, HarvestJob, ImportService, ObjectState};
//!
//! let gather = GatherService::new(fetcher.clone(), repo.clone(), licenses);
//! let import = ImportService::new(ckan, fetcher, repo.clone());
//!
//! let job = HarvestJob::new(source);
//! repo.create_job(&job).await?;
//! if let GatherOutcome::Gathered { .. } = gather.gather(&job).await? {
//!     for object in repo.objects_for_job(job.id, Some(ObjectState::Gathered)).await? {
//!         if gather.fetch(&object).await? {
//!             import.import(&object, &job).await?;
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod convert;
pub mod dates;
pub mod error;
pub mod gather;
pub mod import;
pub mod models;
pub mod munge;
pub mod search;
pub mod stats;
pub mod traits;

// Configuration
pub use config::{
    DbConfig, HttpConfig, RemotePolicy, SourceConfig, SourceEntry, SourcesConfig,
    default_config_path, load_sources_config,
};

// Error handling
pub use error::AppError;

// Domain models
pub use models::{
    ErrorStage, Extra, GroupRef, HarvestJob, HarvestObject, HarvestSource, JobStatus,
    NormalizedPackage, NormalizedResource, ObjectState, PreviousJob, RemotePackage,
    RemoteResource, Tag,
};

// Conversion
pub use convert::DkanConverter;
pub use dates::{DateField, DateNormalizer, DateParseError};

// Statistics
pub use stats::{GatherMode, GatherOutcome, GatherStats, ImportOutcome, ImportStats};

// Traits for dependency injection
pub use traits::{Action, ActionApi, ContentFetcher, HarvestStore, License, LicenseRegistry};

// Services (generic over trait implementations)
pub use gather::GatherService;
pub use import::ImportService;
pub use search::{PackageSearcher, RemoteRecord};
