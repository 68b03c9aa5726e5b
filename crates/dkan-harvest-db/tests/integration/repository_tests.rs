//! Integration tests for HarvestRepository.

use chrono::{TimeDelta, Utc};
use dkan_harvest_core::models::{ErrorStage, HarvestObject, JobStatus, ObjectState};
use dkan_harvest_core::traits::HarvestStore;
use dkan_harvest_core::{HarvestJob, SourceConfig};

use crate::integration::common::{setup_test_repo, source, stored_job};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_objects_round_trip_with_state() {
    let (repo, _container) = setup_test_repo().await;
    let src = source("src-1");
    let job = stored_job(&repo, &src).await;

    let first = HarvestObject::new(job.id, "remote-1", r#"{"id": "remote-1"}"#);
    let second = HarvestObject::new(job.id, "remote-2", r#"{"id": "remote-2"}"#);
    repo.create_object(&first).await.unwrap();
    repo.create_object(&second).await.unwrap();

    repo.mark_object_imported(first.id, "local-1").await.unwrap();

    let pending = repo
        .objects_for_job(job.id, Some(ObjectState::Gathered))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].guid, "remote-2");
    assert_eq!(pending[0].content, second.content);

    let all = repo.objects_for_job(job.id, None).await.unwrap();
    assert_eq!(all.len(), 2);

    assert_eq!(
        repo.object_state(first.id).await.unwrap(),
        Some(ObjectState::Imported)
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_marking_unknown_object_is_not_found() {
    let (repo, _container) = setup_test_repo().await;

    let err = repo
        .mark_object_failed(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_last_error_free_job_skips_jobs_with_errors() {
    let (repo, _container) = setup_test_repo().await;
    let src = source("src-1");

    let mut clean = HarvestJob::new(src.clone());
    clean.gather_started = Utc::now() - TimeDelta::days(2);
    repo.create_job(&clean).await.unwrap();
    repo.set_job_status(clean.id, JobStatus::Finished).await.unwrap();

    let mut broken = HarvestJob::new(src.clone());
    broken.gather_started = Utc::now() - TimeDelta::days(1);
    repo.create_job(&broken).await.unwrap();
    repo.set_job_status(broken.id, JobStatus::Finished).await.unwrap();
    let object = HarvestObject::new(broken.id, "remote-1", "{}");
    repo.create_object(&object).await.unwrap();
    repo.save_object_error(object.id, "Invalid package", ErrorStage::Import)
        .await
        .unwrap();

    let current = stored_job(&repo, &src).await;

    let previous = repo
        .last_error_free_job(&src.id, current.id)
        .await
        .unwrap()
        .expect("the clean job qualifies");
    assert_eq!(previous.id, clean.id);
    assert_eq!(
        previous.gather_started.timestamp_micros(),
        clean.gather_started.timestamp_micros()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_last_error_free_job_ignores_unfinished_and_current() {
    let (repo, _container) = setup_test_repo().await;
    let src = source("src-1");

    let running = stored_job(&repo, &src).await;
    repo.set_job_status(running.id, JobStatus::Running).await.unwrap();

    let current = stored_job(&repo, &src).await;
    repo.set_job_status(current.id, JobStatus::Finished).await.unwrap();

    assert!(
        repo.last_error_free_job(&src.id, current.id)
            .await
            .unwrap()
            .is_none()
    );

    // Jobs of other sources never qualify.
    assert!(
        repo.last_error_free_job("other-source", uuid::Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_gather_errors_disqualify_job_and_are_reported() {
    let (repo, _container) = setup_test_repo().await;
    let src = source("src-1");

    let job = stored_job(&repo, &src).await;
    repo.save_gather_error(job.id, "No datasets found at remote: https://remote.example.org")
        .await
        .unwrap();
    repo.set_job_status(job.id, JobStatus::Finished).await.unwrap();

    assert!(
        repo.last_error_free_job(&src.id, uuid::Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );

    let report = repo.job_report(job.id).await.unwrap();
    assert_eq!(report.gather_errors, 1);
    assert_eq!(report.total_objects(), 0);
    assert_eq!(
        repo.gather_errors(job.id).await.unwrap(),
        vec!["No datasets found at remote: https://remote.example.org".to_string()]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_latest_job_and_report() {
    let (repo, _container) = setup_test_repo().await;
    let src = source("src-1");
    assert!(repo.latest_job(&src).await.unwrap().is_none());

    let job = stored_job(&repo, &src).await;
    let finished = repo.finish_gather(job.id).await.unwrap();

    let imported = HarvestObject::new(job.id, "a", "{}");
    let failed = HarvestObject::new(job.id, "b", "");
    repo.create_object(&imported).await.unwrap();
    repo.create_object(&failed).await.unwrap();
    repo.mark_object_imported(imported.id, "local-a").await.unwrap();
    repo.mark_object_failed(failed.id).await.unwrap();
    repo.save_object_error(failed.id, "Empty content", ErrorStage::Fetch)
        .await
        .unwrap();

    let latest = repo.latest_job(&src).await.unwrap().unwrap();
    assert_eq!(latest.id, job.id);
    assert_eq!(latest.status, JobStatus::New);
    assert_eq!(latest.source.config, SourceConfig::default());
    assert_eq!(
        latest.gather_finished.map(|t| t.timestamp_micros()),
        Some(finished.timestamp_micros())
    );

    let report = repo.job_report(job.id).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.gathered, 0);
    assert_eq!(report.object_errors, 1);
    assert!(!report.is_error_free());
}
