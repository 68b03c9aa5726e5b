use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use dkan_harvest_cli::{Command, Config};
use dkan_harvest_client::{CkanActionClient, HttpFetcher, LicenseList};
use dkan_harvest_core::{
    DbConfig, GatherOutcome, GatherService, HarvestJob, HarvestSource, HttpConfig, ImportService,
    ImportStats, JobStatus, ObjectState, SourcesConfig, load_sources_config,
};
use dkan_harvest_db::HarvestRepository;

type Gather = GatherService<HttpFetcher, HarvestRepository, LicenseList>;
type Import = ImportService<CkanActionClient, HttpFetcher, HarvestRepository>;

const RULE: &str = "═══════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────";

/// The three stages wired to their concrete collaborators.
struct Pipeline {
    repo: HarvestRepository,
    gather: Gather,
    import: Import,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::parse();

    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the tracing subscriber")?;

    let sources = load_sources_config(config.config.clone())?.ok_or_else(|| {
        anyhow::anyhow!(
            "No configuration file found. Edit ~/.config/dkan-harvest/harvest.toml or use --config"
        )
    })?;

    if let Command::Sources = config.command {
        print_sources(&sources);
        return Ok(());
    }

    let pipeline = connect(&config).await?;

    match config.command {
        Command::Sources => {}
        Command::Gather { source, force_all } => {
            let source = resolve_source(&sources, &source, force_all)?;
            gather_stage(&pipeline, source).await?;
        }
        Command::Fetch { source } => {
            let source = resolve_source(&sources, &source, false)?;
            let job = latest_job(&pipeline, &source).await?;
            fetch_stage(&pipeline, &job).await?;
        }
        Command::Import { source } => {
            let source = resolve_source(&sources, &source, false)?;
            let job = latest_job(&pipeline, &source).await?;
            let stats = import_stage(&pipeline, &job).await?;
            print_import_summary(&source, &stats);
        }
        Command::Run {
            source: Some(source),
            force_all,
        } => {
            let source = resolve_source(&sources, &source, force_all)?;
            run_source(&pipeline, source).await?;
        }
        Command::Run {
            source: None,
            force_all,
        } => {
            run_all(&pipeline, &sources, force_all).await;
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<Pipeline> {
    info!("Connecting to database...");
    let db_config = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let repo = HarvestRepository::new(pool);
    repo.migrate().await.context("Failed to run migrations")?;

    let http_config = HttpConfig::default();
    let fetcher = HttpFetcher::new(&http_config)?;
    let ckan = CkanActionClient::new(
        &config.ckan_url,
        config.ckan_api_token.clone(),
        &http_config,
    )?;
    let licenses = LicenseList::load(&ckan)
        .await
        .with_context(|| format!("Failed to load licenses from {}", ckan.base_url()))?;
    info!(ckan = ckan.base_url(), licenses = licenses.len(), "Connected to CKAN");

    Ok(Pipeline {
        gather: GatherService::new(fetcher.clone(), repo.clone(), licenses),
        import: ImportService::new(ckan, fetcher, repo.clone()),
        repo,
    })
}

fn resolve_source(
    sources: &SourcesConfig,
    key: &str,
    force_all: bool,
) -> anyhow::Result<HarvestSource> {
    let entry = sources
        .find(key)
        .ok_or_else(|| anyhow::anyhow!("Source '{}' not found in configuration", key))?;

    if !entry.enabled {
        info!("Note: source '{}' is marked as disabled in configuration", key);
    }

    let mut source = entry
        .to_source()
        .with_context(|| format!("Invalid configuration for source '{}'", key))?;
    if force_all {
        source.config.force_all = true;
    }
    Ok(source)
}

async fn latest_job(pipeline: &Pipeline, source: &HarvestSource) -> anyhow::Result<HarvestJob> {
    let job = pipeline
        .repo
        .latest_job(source)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!("Source '{}' has no harvest job yet, run gather first", source.id)
        })?;

    if job.status == JobStatus::Finished {
        warn!(job = %job.id, "Latest job is already finished");
    }
    Ok(job)
}

// =============================================================================
// Stages
// =============================================================================

/// Starts a job and gathers. Returns `None` when there is nothing to import.
async fn gather_stage(
    pipeline: &Pipeline,
    source: HarvestSource,
) -> anyhow::Result<Option<HarvestJob>> {
    let mut job = HarvestJob::new(source);
    job.status = JobStatus::Running;
    pipeline.repo.create_job(&job).await?;

    let outcome = pipeline.gather.gather(&job).await;
    job.gather_finished = Some(pipeline.repo.finish_gather(job.id).await?);

    match outcome {
        Ok(GatherOutcome::Gathered { stats, .. }) => {
            info!(
                source = job.source.base_url(),
                mode = stats.mode.as_str(),
                gathered = stats.gathered,
                duplicates = stats.duplicates,
                failed = stats.failed,
                "Gather stage complete"
            );
            Ok(Some(job))
        }
        Ok(GatherOutcome::NothingNew) => {
            pipeline.repo.set_job_status(job.id, JobStatus::Finished).await?;
            info!(source = job.source.base_url(), "Nothing new to harvest");
            Ok(None)
        }
        Err(e) => {
            pipeline.repo.set_job_status(job.id, JobStatus::Finished).await?;
            Err(anyhow::anyhow!(
                "Gather failed for {}: {}",
                job.source.base_url(),
                e.user_message()
            ))
        }
    }
}

async fn fetch_stage(pipeline: &Pipeline, job: &HarvestJob) -> anyhow::Result<()> {
    let objects = pipeline
        .repo
        .objects_for_job(job.id, Some(ObjectState::Gathered))
        .await?;

    let mut empty = 0usize;
    for object in &objects {
        if !pipeline.gather.fetch(object).await? {
            empty += 1;
        }
    }

    info!(
        job = %job.id,
        checked = objects.len(),
        empty,
        "Fetch stage complete"
    );
    Ok(())
}

async fn import_stage(pipeline: &Pipeline, job: &HarvestJob) -> anyhow::Result<ImportStats> {
    let objects = pipeline
        .repo
        .objects_for_job(job.id, Some(ObjectState::Gathered))
        .await?;
    info!(job = %job.id, pending = objects.len(), "Starting import stage");

    let mut stats = ImportStats::new();
    for object in &objects {
        let outcome = pipeline.import.import(object, job).await?;
        stats.record(outcome);
    }

    pipeline.repo.set_job_status(job.id, JobStatus::Finished).await?;
    Ok(stats)
}

async fn run_source(pipeline: &Pipeline, source: HarvestSource) -> anyhow::Result<ImportStats> {
    let Some(job) = gather_stage(pipeline, source.clone()).await? else {
        return Ok(ImportStats::new());
    };
    fetch_stage(pipeline, &job).await?;
    let stats = import_stage(pipeline, &job).await?;
    print_import_summary(&source, &stats);

    let report = pipeline.repo.job_report(job.id).await?;
    if !report.is_error_free() {
        warn!(
            job = %job.id,
            gather_errors = report.gather_errors,
            object_errors = report.object_errors,
            "Job finished with errors, the next harvest will not be incremental from it"
        );
    }
    Ok(stats)
}

async fn run_all(pipeline: &Pipeline, sources: &SourcesConfig, force_all: bool) {
    let enabled = sources.enabled_sources();
    if enabled.is_empty() {
        info!("No enabled sources found in configuration.");
        return;
    }

    info!("{}", RULE);
    info!("Starting harvest of {} sources", enabled.len());
    info!("{}", RULE);

    let mut failures: Vec<(String, String)> = Vec::new();
    let mut total = ImportStats::new();
    for entry in enabled {
        let result = match resolve_source(sources, &entry.id, force_all) {
            Ok(source) => run_source(pipeline, source).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(stats) => {
                total.created += stats.created;
                total.updated += stats.updated;
                total.unchanged += stats.unchanged;
                total.skipped += stats.skipped;
                total.failed += stats.failed;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(source = %entry.id, error = %message, "Harvest failed");
                failures.push((entry.title.clone(), message));
            }
        }
    }

    info!("");
    info!("{}", RULE);
    info!("HARVEST COMPLETE");
    info!("{}", RULE);
    info!("  Datasets imported:   {}", total.successful());
    info!("  Objects failed:      {}", total.failed);
    info!("  Sources failed:      {}", failures.len());
    if !failures.is_empty() {
        info!("{}", THIN_RULE);
        info!("Failed sources:");
        for (title, err) in &failures {
            error!("  - {}: {}", title, err);
        }
    }
    info!("{}", RULE);
}

// =============================================================================
// Output
// =============================================================================

fn print_sources(sources: &SourcesConfig) {
    if sources.sources.is_empty() {
        println!("No sources configured.");
        return;
    }
    for entry in &sources.sources {
        let marker = if entry.enabled { "●" } else { "○" };
        println!("{} {:<24} {}", marker, entry.id, entry.url);
        println!("  {}", entry.title);
        println!(
            "  orgs: {}  groups: {}{}",
            entry.config.remote_orgs,
            entry.config.remote_groups,
            if entry.config.force_all { "  force_all" } else { "" }
        );
    }
}

fn print_import_summary(source: &HarvestSource, stats: &ImportStats) {
    info!("");
    info!("{}", RULE);
    info!("Import complete: {}", source.base_url());
    info!("{}", RULE);
    info!("  = Unchanged:         {}", stats.unchanged);
    info!("  ↑ Updated:           {}", stats.updated);
    info!("  + Created:           {}", stats.created);
    info!("  - Skipped:           {}", stats.skipped);
    info!("  ✗ Failed:            {}", stats.failed);
    info!("{}", THIN_RULE);
    info!("  Total processed:     {}", stats.total());
    info!("  Successful:          {}", stats.successful());
    info!("{}", RULE);

    if stats.failed == 0 {
        info!("All objects imported successfully!");
    }
}
