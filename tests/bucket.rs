//! Integration tests for bucket resolution

mod common;

#[tokio::test]
async fn test_get_or_create_is_stable() {
    let env = common::setup().await;

    let first = env.engine.get_or_create_bucket("docs").await.unwrap();
    assert!(!first.metadata.db_id.is_empty());
    assert!(!first.root.key.is_empty());

    // a second resolution returns the identical db id, no fresh thread id
    let second = env.engine.get_or_create_bucket("docs").await.unwrap();
    assert_eq!(first.metadata.db_id, second.metadata.db_id);
    assert_eq!(first.root.key, second.root.key);
}

#[tokio::test]
async fn test_resolved_buckets_register_with_listener() {
    let env = common::setup().await;

    let bucket = env.engine.get_or_create_bucket("docs").await.unwrap();
    assert!(env.engine.listener().is_watching(&bucket.metadata.db_id));
}

#[tokio::test]
async fn test_distinct_buckets_get_distinct_threads() {
    let env = common::setup().await;

    let docs = env.engine.get_or_create_bucket("docs").await.unwrap();
    let music = env.engine.get_or_create_bucket("music").await.unwrap();
    assert_ne!(docs.metadata.db_id, music.metadata.db_id);
    assert_ne!(docs.root.key, music.root.key);
}
