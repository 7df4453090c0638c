//! Usage statistics written by live sessions.

use std::sync::Arc;

use cascade_core::client::ServerReply;
use cascade_core::media::MediaFormat;
use cascade_core::testing::{RecordingLauncher, catalog_of};
use cascade_core::usage::{CSV_HEADER, CsvUsageLog};
use tempfile::tempdir;

use crate::common::{DEMO_FILES, TestServer, WAIT};

#[tokio::test]
async fn test_stream_starts_are_appended_to_csv() {
    let temp_dir = tempdir().unwrap();
    let stats_path = temp_dir.path().join("logs").join("server_stats.csv");
    let usage = Arc::new(CsvUsageLog::open(&stats_path).await.unwrap());

    let launcher = RecordingLauncher::new().failing_on("demo-360p.mp4");
    let server = TestServer::start(catalog_of(DEMO_FILES), &launcher, usage).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 3.0).await.unwrap();

    client.request("demo-720p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));
    client.request("demo-360p.mp4", None).await.unwrap();
    assert!(matches!(
        client.read_reply(WAIT).await.unwrap(),
        Some(ServerReply::Error(_))
    ));
    client.request("clip-240p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    server.stop().await;

    let contents = std::fs::read_to_string(&stats_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], CSV_HEADER);
    assert!(lines[1].ends_with(",127.0.0.1,demo-720p.mp4,RTP,3.00"));
    assert!(lines[2].ends_with(",127.0.0.1,clip-240p.mp4,TCP,3.00"));
}
