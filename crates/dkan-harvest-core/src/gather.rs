//! Gather and fetch stages of a harvest job.
//!
//! # Search strategy
//!
//! 1. If `force_all` is set or the source has never been harvested without
//!    errors: full search
//! 2. Otherwise, search for packages modified since one hour before the last
//!    error-free job started
//! 3. If the incremental search fails, fall back to a full search
//!
//! An incremental search that finds nothing ends the gather stage early with
//! [`GatherOutcome::NothingNew`]. A full search that finds nothing is an error.
//!
//! Every gathered record is converted right away; the harvest object stores
//! the normalized package, so the fetch stage only checks it is there.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};

use crate::convert::DkanConverter;
use crate::dates::DateNormalizer;
use crate::error::AppError;
use crate::models::{ErrorStage, HarvestJob, HarvestObject, RemotePackage};
use crate::search::{PackageSearcher, RemoteRecord};
use crate::stats::{GatherMode, GatherOutcome, GatherStats};
use crate::traits::{ContentFetcher, HarvestStore, LicenseRegistry};

/// Service running the gather and fetch stages.
///
/// # Type Parameters
///
/// * `F` - Content fetcher used to page through the remote search API
/// * `S` - Harvest store for jobs, objects and errors
/// * `L` - License registry of the local instance
///
/// # Example
///
/// ```ignore
/// use dkan_harvest_core::gather::GatherService;
///
/// let gather = GatherService::new(fetcher, repo, licenses);
/// match gather.gather(&job).await? {
///     GatherOutcome::Gathered { object_ids, stats } => println!("{} objects", stats.gathered),
///     GatherOutcome::NothingNew => println!("up to date"),
/// }
/// ```
pub struct GatherService<F, S, L>
where
    F: ContentFetcher,
    S: HarvestStore,
    L: LicenseRegistry,
{
    searcher: PackageSearcher<F>,
    store: S,
    licenses: L,
}

impl<F, S, L> Clone for GatherService<F, S, L>
where
    F: ContentFetcher,
    S: HarvestStore,
    L: LicenseRegistry,
{
    fn clone(&self) -> Self {
        Self {
            searcher: self.searcher.clone(),
            store: self.store.clone(),
            licenses: self.licenses.clone(),
        }
    }
}

impl<F, S, L> GatherService<F, S, L>
where
    F: ContentFetcher,
    S: HarvestStore,
    L: LicenseRegistry,
{
    pub fn new(fetcher: F, store: S, licenses: L) -> Self {
        Self {
            searcher: PackageSearcher::new(fetcher),
            store,
            licenses,
        }
    }

    /// Overrides the search page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.searcher = self.searcher.with_page_size(page_size);
        self
    }

    /// Runs the gather stage of `job`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Search`] (or the underlying error) when the full search
    ///   fails; a gather error is recorded on the job first
    /// - [`AppError::NoDatasetsFound`] when the full search returns nothing
    /// - store errors are propagated as they are
    ///
    /// Conversion failures are not errors: they are recorded on the job and
    /// counted in [`GatherStats::failed`].
    pub async fn gather(&self, job: &HarvestJob) -> Result<GatherOutcome, AppError> {
        let source = &job.source;
        let base_url = source.base_url();
        let config = &source.config;
        let fq_terms = config.organization_filter_terms();

        tracing::info!(source = base_url, job = %job.id, "Starting gather");

        let previous = if config.force_all {
            tracing::info!(source = base_url, "Full search forced by source config");
            None
        } else {
            self.store.last_error_free_job(&source.id, job.id).await?
        };

        let (mode, packages) = match previous {
            Some(previous) => {
                let mut terms = fq_terms.clone();
                terms.push(modified_since_term(previous.gather_started));
                tracing::info!(
                    source = base_url,
                    previous_job = %previous.id,
                    "Searching for datasets modified since the last error-free job"
                );

                match self.searcher.search(base_url, &terms).await {
                    Ok(packages) if packages.is_empty() => {
                        tracing::info!(
                            source = base_url,
                            "No datasets have been updated on the remote since the last harvest"
                        );
                        return Ok(GatherOutcome::NothingNew);
                    }
                    Ok(packages) => (GatherMode::Incremental, packages),
                    Err(e) => {
                        tracing::warn!(
                            source = base_url,
                            error = %e,
                            "Incremental search failed, falling back to full search"
                        );
                        (GatherMode::Full, self.full_search(job, &fq_terms).await?)
                    }
                }
            }
            None => (GatherMode::Full, self.full_search(job, &fq_terms).await?),
        };

        let (object_ids, stats) = self.store_objects(job, mode, packages).await?;

        tracing::info!(
            source = base_url,
            mode = mode.as_str(),
            found = stats.found,
            gathered = stats.gathered,
            duplicates = stats.duplicates,
            failed = stats.failed,
            "Gather finished"
        );

        Ok(GatherOutcome::Gathered { object_ids, stats })
    }

    async fn full_search(
        &self,
        job: &HarvestJob,
        fq_terms: &[String],
    ) -> Result<Vec<RemoteRecord>, AppError> {
        let base_url = job.source.base_url();

        let packages = match self.searcher.search(base_url, fq_terms).await {
            Ok(packages) => packages,
            Err(e) => {
                tracing::error!(source = base_url, error = %e, "Searching for all datasets failed");
                let message = format!(
                    "Unable to search remote DKAN for datasets: {} url: {} terms: {:?}",
                    e, base_url, fq_terms
                );
                self.store.save_gather_error(job.id, &message).await?;
                return Err(e);
            }
        };

        if packages.is_empty() {
            let err = AppError::NoDatasetsFound(base_url.to_string());
            self.store.save_gather_error(job.id, &err.to_string()).await?;
            return Err(err);
        }

        Ok(packages)
    }

    /// Converts and stores each record as a harvest object, first id wins.
    ///
    /// A record whose fields have an unexpected shape fails conversion like
    /// any other malformed package.
    async fn store_objects(
        &self,
        job: &HarvestJob,
        mode: GatherMode,
        records: Vec<RemoteRecord>,
    ) -> Result<(Vec<uuid::Uuid>, GatherStats), AppError> {
        let converter =
            DkanConverter::new(&self.licenses, DateNormalizer::from_config(&job.source.config));
        let mut stats = GatherStats::new(mode, records.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut object_ids = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                tracing::warn!(
                    dataset = %record.id,
                    "Discarding duplicate dataset, probably changed on the remote while paging"
                );
                stats.duplicates += 1;
                continue;
            }

            let guid = record.id;
            let converted = serde_json::from_value::<RemotePackage>(record.value)
                .map_err(|e| AppError::Conversion(format!("unhandled field shape: {}", e)))
                .and_then(|remote| converter.convert(remote));
            let package = match converted {
                Ok(package) => package,
                Err(e) => {
                    tracing::warn!(dataset = %guid, error = %e, "Dropping package");
                    let message = format!("Unable to convert DKAN package {}: {}", guid, e);
                    self.store.save_gather_error(job.id, &message).await?;
                    stats.failed += 1;
                    continue;
                }
            };

            let content = serde_json::to_string(&package)?;
            let object = HarvestObject::new(job.id, guid, content);
            self.store.create_object(&object).await?;
            object_ids.push(object.id);
            stats.gathered += 1;
        }

        Ok((object_ids, stats))
    }

    /// Runs the fetch stage for one object.
    ///
    /// The content was captured during gather, so this only verifies it.
    /// Returns `false` (with an object error recorded) for empty content.
    pub async fn fetch(&self, object: &HarvestObject) -> Result<bool, AppError> {
        let has_content = object
            .content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());

        if !has_content {
            tracing::warn!(object = %object.id, guid = %object.guid, "Harvest object has no content");
            self.store
                .save_object_error(
                    object.id,
                    &format!("Empty content for object {}", object.id),
                    ErrorStage::Fetch,
                )
                .await?;
            self.store.mark_object_failed(object.id).await?;
        }

        Ok(has_content)
    }
}

/// Search term selecting packages modified since one hour before `gather_started`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use dkan_harvest_core::gather::modified_since_term;
///
/// let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
/// assert_eq!(
///     modified_since_term(started),
///     "metadata_modified:[2024-03-01T11:30:00Z TO *]"
/// );
/// ```
pub fn modified_since_term(gather_started: DateTime<Utc>) -> String {
    let since = gather_started - TimeDelta::hours(1);
    format!(
        "metadata_modified:[{}Z TO *]",
        since.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f")
    )
}
