//! DKAN Harvest DB - PostgreSQL persistence for the harvest pipeline
//!
//! This crate provides [`HarvestRepository`], the [`HarvestStore`] used by the
//! CLI. It keeps harvest jobs, the objects they gathered, the import state of
//! each object and the gather/object errors that decide whether a job can
//! serve as the baseline of the next incremental harvest.
//!
//! The schema ships as embedded migrations ([`MIGRATOR`]).
//!
//! [`HarvestStore`]: dkan_harvest_core::traits::HarvestStore

mod repository;

pub use repository::{HarvestRepository, JobReport, MIGRATOR};
