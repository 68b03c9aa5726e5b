//! Integration tests for GatherService.
//!
//! These tests drive the gather and fetch stages against an in-memory remote
//! and store.

use chrono::{TimeZone, Utc};
use dkan_harvest_core::models::{ErrorStage, HarvestObject, NormalizedPackage};
use dkan_harvest_core::{AppError, GatherMode, GatherOutcome, GatherService, SourceConfig};
use serde_json::json;

use crate::integration::common::{
    MockHarvestStore, MockLicenses, MockRemote, job, remote_package,
};

fn packages(count: usize) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| remote_package(&format!("pkg-{:03}", i), &format!("Dataset {}", i)))
        .collect()
}

#[tokio::test]
async fn test_first_gather_runs_full_search() {
    let remote = MockRemote::new(packages(3));
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote.clone(), store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    let GatherOutcome::Gathered { object_ids, stats } = outcome else {
        panic!("expected gathered objects");
    };
    assert_eq!(object_ids.len(), 3);
    assert_eq!(stats.mode, GatherMode::Full);
    assert_eq!(stats.gathered, 3);
    assert_eq!(store.objects().len(), 3);

    let requests = remote.search_requests();
    assert!(
        requests.iter().all(|u| u.query_pairs().all(|(k, _)| k != "fq")),
        "a full search without filters sends no fq"
    );
}

#[tokio::test]
async fn test_objects_hold_converted_packages() {
    let remote = MockRemote::new(vec![remote_package("abc", "Bus Stops")]);
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote, store.clone(), MockLicenses);

    let job = job(SourceConfig::default());
    service.gather(&job).await.unwrap();

    let objects = store.objects();
    assert_eq!(objects[0].guid, "abc");
    assert_eq!(objects[0].job_id, job.id);

    let package: NormalizedPackage =
        serde_json::from_str(objects[0].content.as_deref().unwrap()).unwrap();
    assert_eq!(package.name, "bus-stops");
    assert!(!package.private);
    assert_eq!(package.resources[0].format, "CSV");
    assert_eq!(package.resources[0].size, Some(1.5));
    assert_eq!(package.resources[0].created, "2020-01-02T03:04:00.000000");
    assert_eq!(package.resources[0].description.as_deref(), Some("Bus Stops data"));
    assert!(!objects[0].content.as_deref().unwrap().contains("revision_id"));
}

#[tokio::test]
async fn test_paging_covers_more_than_one_page() {
    let remote = MockRemote::new(packages(5));
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote.clone(), store.clone(), MockLicenses).with_page_size(2);

    service.gather(&job(SourceConfig::default())).await.unwrap();

    assert_eq!(store.objects().len(), 5);
    // Three pages with records, one empty page.
    assert_eq!(remote.search_requests().len(), 4);
}

#[tokio::test]
async fn test_incremental_search_uses_last_job() {
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let remote = MockRemote::new(packages(4)).with_modified(Some(packages(1)));
    let store = MockHarvestStore::with_previous_job(started);
    let service = GatherService::new(remote.clone(), store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    let GatherOutcome::Gathered { stats, .. } = outcome else {
        panic!("expected gathered objects");
    };
    assert_eq!(stats.mode, GatherMode::Incremental);
    assert_eq!(stats.gathered, 1);

    let fq: String = remote.search_requests()[0]
        .query_pairs()
        .find(|(k, _)| k == "fq")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(fq, "metadata_modified:[2024-05-01T09:00:00Z TO *]");
}

#[tokio::test]
async fn test_incremental_search_with_nothing_new() {
    let remote = MockRemote::new(packages(4)).with_modified(Some(Vec::new()));
    let store = MockHarvestStore::with_previous_job(Utc::now());
    let service = GatherService::new(remote, store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    assert_eq!(outcome, GatherOutcome::NothingNew);
    assert!(store.objects().is_empty());
    assert!(store.gather_errors().is_empty());
}

#[tokio::test]
async fn test_incremental_failure_falls_back_to_full_search() {
    let remote = MockRemote::new(packages(2)).with_modified(None);
    let store = MockHarvestStore::with_previous_job(Utc::now());
    let service = GatherService::new(remote.clone(), store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    let GatherOutcome::Gathered { stats, .. } = outcome else {
        panic!("expected gathered objects");
    };
    assert_eq!(stats.mode, GatherMode::Full);
    assert_eq!(stats.gathered, 2);
    assert!(store.gather_errors().is_empty());
}

#[tokio::test]
async fn test_force_all_skips_incremental_search() {
    let remote = MockRemote::new(packages(2)).with_modified(Some(packages(1)));
    let store = MockHarvestStore::with_previous_job(Utc::now());
    let service = GatherService::new(remote.clone(), store.clone(), MockLicenses);

    let config = SourceConfig::default().with_force_all();
    service.gather(&job(config)).await.unwrap();

    assert_eq!(store.objects().len(), 2);
    assert!(
        remote
            .search_requests()
            .iter()
            .all(|u| u.query_pairs().all(|(k, _)| k != "fq"))
    );
}

#[tokio::test]
async fn test_no_datasets_found() {
    let remote = MockRemote::new(Vec::new());
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote, store.clone(), MockLicenses);

    let result = service.gather(&job(SourceConfig::default())).await;

    assert!(matches!(result, Err(AppError::NoDatasetsFound(_))));
    assert_eq!(
        store.gather_errors(),
        vec!["No datasets found at remote: https://remote.example.org".to_string()]
    );
}

#[tokio::test]
async fn test_unreachable_remote_records_gather_error() {
    let store = MockHarvestStore::new();
    let service = GatherService::new(MockRemote::unreachable(), store.clone(), MockLicenses);

    let result = service.gather(&job(SourceConfig::default())).await;

    assert!(matches!(result, Err(AppError::Search(_))));
    let errors = store.gather_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Unable to search remote DKAN for datasets"));
}

#[tokio::test]
async fn test_mis_shaped_record_fails_only_that_package() {
    let odd = json!({
        "id": "odd",
        "title": "Odd",
        "resources": [{"title": "Data", "mimetype": "text/csv", "created": 1577934240}]
    });
    let remote = MockRemote::new(vec![remote_package("good", "Good"), odd]);
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote, store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    let GatherOutcome::Gathered { stats, .. } = outcome else {
        panic!("expected gathered objects");
    };
    assert_eq!(stats.mode, GatherMode::Full);
    assert_eq!(stats.found, 2);
    assert_eq!(stats.gathered, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(store.objects()[0].guid, "good");
    let errors = store.gather_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("odd"));
}

#[tokio::test]
async fn test_conversion_failure_drops_only_that_package() {
    let mut records = packages(2);
    records.push(json!({"id": "no-resources", "title": "Empty"}));
    let remote = MockRemote::new(records);
    let store = MockHarvestStore::new();
    let service = GatherService::new(remote, store.clone(), MockLicenses);

    let outcome = service.gather(&job(SourceConfig::default())).await.unwrap();

    let GatherOutcome::Gathered { stats, .. } = outcome else {
        panic!("expected gathered objects");
    };
    assert_eq!(stats.found, 3);
    assert_eq!(stats.gathered, 2);
    assert_eq!(stats.failed, 1);
    let errors = store.gather_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("no-resources"));
}

#[tokio::test]
async fn test_organization_include_filter() {
    let remote = MockRemote::new(packages(1));
    let service = GatherService::new(remote.clone(), MockHarvestStore::new(), MockLicenses);

    let config = SourceConfig {
        organizations_filter_include: vec!["parks".to_string(), "roads".to_string()],
        ..Default::default()
    };
    service.gather(&job(config)).await.unwrap();

    let fq: String = remote.search_requests()[0]
        .query_pairs()
        .find(|(k, _)| k == "fq")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(fq, "organization:parks OR organization:roads");
}

#[tokio::test]
async fn test_fetch_checks_content() {
    let store = MockHarvestStore::new();
    let service = GatherService::new(MockRemote::new(Vec::new()), store.clone(), MockLicenses);
    let job = job(SourceConfig::default());

    let full = HarvestObject::new(job.id, "a", r#"{"id": "a"}"#);
    assert!(service.fetch(&full).await.unwrap());
    assert!(store.object_errors(full.id).is_empty());

    let mut empty = HarvestObject::new(job.id, "b", "");
    empty.content = None;
    assert!(!service.fetch(&empty).await.unwrap());
    let errors = store.object_errors(empty.id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, ErrorStage::Fetch);
    assert!(store.is_failed(empty.id));
}
