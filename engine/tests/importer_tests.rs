mod common;

use common::{registry_image, test_config, MockRegistry};
use warden_core::WardenError;
use warden_engine::importer::wait_for_active;

#[tokio::test]
async fn test_active_image_returns_immediately() {
    let registry = MockRegistry::new();
    registry.seed(registry_image("img", "Debian 12 (20240801)"));

    let config = test_config();
    let image = wait_for_active(&registry, &config, "img", "Debian 12 (20240801)")
        .await
        .unwrap();
    assert_eq!(image.status, "active");
}

#[tokio::test]
async fn test_image_stuck_in_queued_fails_after_the_retry_budget() {
    let registry = MockRegistry::new();
    let mut stuck = registry_image("img", "Debian 12 (20240801)");
    stuck.status = "queued".to_string();
    registry.seed(stuck);

    // the web-download task never picks the record up
    let config = test_config();
    let err = wait_for_active(&registry, &config, "img", "Debian 12 (20240801)")
        .await
        .unwrap_err();
    match err {
        WardenError::ImportError { image, message } => {
            assert_eq!(image, "Debian 12 (20240801)");
            assert!(message.contains("queued"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_import_that_never_finishes_hits_the_poll_cap() {
    let registry = MockRegistry::new();
    let mut saving = registry_image("img", "Debian 12 (20240801)");
    saving.status = "saving".to_string();
    registry.seed(saving);

    let mut config = test_config();
    config.import_poll_limit = 3;

    let err = wait_for_active(&registry, &config, "img", "Debian 12 (20240801)")
        .await
        .unwrap_err();
    match err {
        WardenError::ImportError { message, .. } => {
            assert!(message.contains("saving"));
            assert!(message.contains("did not finish"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
