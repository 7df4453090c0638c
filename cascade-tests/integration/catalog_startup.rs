//! Startup catalog build followed by client queries.

use std::sync::Arc;

use cascade_core::catalog::{CatalogError, RenditionCatalog, RenditionKey};
use cascade_core::media::{MediaFormat, Resolution};
use cascade_core::policy::SelectionPolicy;
use cascade_core::testing::{RecordingLauncher, StubTranscoder, content_dir_with};
use cascade_core::usage::NoopUsageRecorder;

use crate::common::TestServer;

#[tokio::test]
async fn test_synthesized_catalog_is_served() {
    let content = content_dir_with(&["trailer-720p.mp4", "notes.txt"]);
    let transcoder = StubTranscoder::new();

    let catalog = RenditionCatalog::build(content.path(), &transcoder, &SelectionPolicy::default())
        .await
        .unwrap();
    assert_eq!(catalog.len(), 12);
    assert_eq!(transcoder.calls().len(), 11);
    assert!(content.path().join("trailer-240p.mkv").exists());
    assert_eq!(catalog.native_resolution("trailer"), Some(Resolution::P720));

    let launcher = RecordingLauncher::new();
    let server = TestServer::start(catalog, &launcher, Arc::new(NoopUsageRecorder)).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Avi, 1.0).await.unwrap();
    assert_eq!(
        listing.files,
        vec!["trailer-240p.avi", "trailer-360p.avi", "trailer-480p.avi"]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_failed_synthesis_is_never_offered() {
    let content = content_dir_with(&["trailer-480p.mkv"]);
    let transcoder = StubTranscoder::new().failing_on("trailer-360p.mkv");

    let catalog = RenditionCatalog::build(content.path(), &transcoder, &SelectionPolicy::default())
        .await
        .unwrap();
    assert_eq!(
        catalog.missing(),
        &[RenditionKey::new("trailer", Resolution::P360, MediaFormat::Mkv)]
    );

    let launcher = RecordingLauncher::new();
    let server = TestServer::start(catalog, &launcher, Arc::new(NoopUsageRecorder)).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Mkv, 10.0).await.unwrap();
    assert!(!listing.files.iter().any(|file| file == "trailer-360p.mkv"));
    assert!(listing.files.iter().any(|file| file == "trailer-480p.mkv"));
    assert!(listing.files.iter().any(|file| file == "trailer-240p.mkv"));

    server.stop().await;
}

#[tokio::test]
async fn test_empty_directory_serves_empty_listing() {
    let content = content_dir_with(&[]);
    let catalog = RenditionCatalog::build(
        content.path(),
        &StubTranscoder::new(),
        &SelectionPolicy::default(),
    )
    .await
    .unwrap();
    assert!(catalog.is_empty());

    let launcher = RecordingLauncher::new();
    let server = TestServer::start(catalog, &launcher, Arc::new(NoopUsageRecorder)).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();
    assert!(listing.is_empty());
    assert_eq!(listing.advisory, None);

    server.stop().await;
}

#[tokio::test]
async fn test_missing_content_directory_is_fatal() {
    let content = content_dir_with(&[]);
    let missing = content.path().join("videos");

    let result =
        RenditionCatalog::build(&missing, &StubTranscoder::new(), &SelectionPolicy::default()).await;
    assert!(matches!(result, Err(CatalogError::ContentDirMissing { .. })));
}
