//! Test utilities for integration tests.
//!
//! Provides helper functions to set up isolated PostgreSQL containers with
//! the harvest schema for each test.

use dkan_harvest_core::{HarvestJob, HarvestSource, SourceConfig};
use dkan_harvest_db::HarvestRepository;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Starts a PostgreSQL container and returns a migrated repository.
///
/// Keep the container alive for the test duration; it is removed on drop.
pub async fn setup_test_repo() -> (HarvestRepository, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    // The server restarts once after initdb, so the first connects may fail.
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!(
                        "Failed to connect to database after {} retries: {}",
                        MAX_RETRIES, e
                    );
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    let repo = HarvestRepository::new(pool);
    repo.migrate().await.expect("Failed to run migrations");

    (repo, container)
}

pub fn source(id: &str) -> HarvestSource {
    HarvestSource {
        id: id.to_string(),
        url: "https://remote.example.org".to_string(),
        title: format!("Source {}", id),
        config: SourceConfig::default(),
    }
}

/// Creates and stores a new job for `source`.
pub async fn stored_job(repo: &HarvestRepository, source: &HarvestSource) -> HarvestJob {
    let job = HarvestJob::new(source.clone());
    repo.create_job(&job).await.expect("create_job should succeed");
    job
}
