//! Sessions driven end to end through the dispatcher.

use cascade_core::client::{ClientError, ServerReply};
use cascade_core::media::{MediaFormat, Transport};
use cascade_core::testing::{LaunchEvent, RecordingLauncher};
use futures::future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::common::{TestServer, WAIT};

#[tokio::test]
async fn test_catalog_then_automatic_transport() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();
    assert_eq!(
        listing.files,
        vec![
            "demo-240p.mp4",
            "demo-360p.mp4",
            "demo-480p.mp4",
            "demo-720p.mp4",
            "demo-1080p.mp4",
            "clip-240p.mp4",
            "clip-360p.mp4",
        ]
    );
    assert_eq!(listing.advisory, None);

    client.request("demo-720p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    assert_eq!(
        launcher.events(),
        vec![LaunchEvent::started("demo-720p.mp4", Transport::Rtp)]
    );
    let targets = launcher.targets();
    assert_eq!(targets[0].host, "127.0.0.1");
    assert_eq!(targets[0].port, 1234);

    client.close().await.unwrap();
    let events = launcher.wait_for_events(2, WAIT).await;
    assert_eq!(events[1], LaunchEvent::stopped("demo-720p.mp4"));

    server.stop().await;
}

#[tokio::test]
async fn test_listing_respects_bandwidth_ceiling() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Mp4, 0.8).await.unwrap();
    assert_eq!(
        listing.files,
        vec!["demo-240p.mp4", "demo-360p.mp4", "clip-240p.mp4", "clip-360p.mp4"]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_switch_stops_previous_stream_first() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();

    client.request("demo-480p.mp4", Some(Transport::Udp)).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));
    client.request("demo-1080p.mp4", Some(Transport::Tcp)).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    assert_eq!(
        launcher.events(),
        vec![
            LaunchEvent::started("demo-480p.mp4", Transport::Udp),
            LaunchEvent::stopped("demo-480p.mp4"),
            LaunchEvent::started("demo-1080p.mp4", Transport::Tcp),
        ]
    );
    assert_eq!(launcher.max_concurrent(), 1);

    client.close().await.unwrap();
    let events = launcher.wait_for_events(4, WAIT).await;
    assert_eq!(events.last(), Some(&LaunchEvent::stopped("demo-1080p.mp4")));
    assert_eq!(launcher.live(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_renegotiation_keeps_current_stream() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();

    client.request("demo-1080p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    let listing = client.negotiate(MediaFormat::Mp4, 1.0).await.unwrap();
    assert_eq!(
        listing.files,
        vec![
            "demo-240p.mp4",
            "demo-360p.mp4",
            "demo-480p.mp4",
            "clip-240p.mp4",
            "clip-360p.mp4",
        ]
    );
    assert_eq!(launcher.live(), 1);

    client.request("demo-480p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));
    assert_eq!(
        launcher.events(),
        vec![
            LaunchEvent::started("demo-1080p.mp4", Transport::Rtp),
            LaunchEvent::stopped("demo-1080p.mp4"),
            LaunchEvent::started("demo-480p.mp4", Transport::Udp),
        ]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_failed_start_reports_error_and_session_continues() {
    let launcher = RecordingLauncher::new().failing_on("demo-360p.mp4");
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();

    client.request("demo-240p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    client.request("demo-360p.mp4", None).await.unwrap();
    match client.read_reply(WAIT).await.unwrap() {
        Some(ServerReply::Error(reason)) => assert!(reason.contains("demo-360p.mp4")),
        other => panic!("expected an error line, got {other:?}"),
    }
    assert_eq!(launcher.live(), 0);

    client.request("demo-480p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));
    assert_eq!(launcher.live(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_unsupported_bandwidth_gets_advisory_and_close() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;

    let listing = client.negotiate(MediaFormat::Mp4, 0.1).await.unwrap();
    assert!(listing.is_empty());
    assert_eq!(
        listing.advisory.as_deref(),
        Some("No supported resolution for your speed.")
    );

    tokio::time::timeout(WAIT, client.wait_closed())
        .await
        .expect("server hangs up")
        .unwrap();
    assert!(launcher.events().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_first_line_closes_silently() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"mp4\n").await.unwrap();

    let mut received = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut received))
        .await
        .expect("server hangs up")
        .unwrap();
    assert!(received.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_rendition_ends_session_and_releases_stream() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();

    client.request("clip-360p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    // Listed only for avi, so unknown for an mp4 session.
    client.request("demo-720p.avi", None).await.unwrap();
    assert!(matches!(
        client.read_reply(WAIT).await,
        Err(ClientError::ConnectionClosed)
    ));

    let events = launcher.wait_for_events(2, WAIT).await;
    assert_eq!(events[1], LaunchEvent::stopped("clip-360p.mp4"));

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;

    let (mut first, mut second) = future::join(server.connect(), server.connect()).await;
    first.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();
    second.negotiate(MediaFormat::Mp4, 2.0).await.unwrap();

    first.request("demo-720p.mp4", None).await.unwrap();
    second.request("clip-240p.mp4", None).await.unwrap();
    let (first_reply, second_reply) =
        future::join(first.read_reply(WAIT), second.read_reply(WAIT)).await;
    assert_eq!(first_reply.unwrap(), Some(ServerReply::Ready));
    assert_eq!(second_reply.unwrap(), Some(ServerReply::Ready));
    assert_eq!(launcher.live(), 2);

    first.close().await.unwrap();
    let events = launcher.wait_for_events(3, WAIT).await;
    assert!(events.contains(&LaunchEvent::stopped("demo-720p.mp4")));
    assert!(!events.contains(&LaunchEvent::stopped("clip-240p.mp4")));
    assert_eq!(launcher.live(), 1);

    second.send_ready().await.unwrap();
    second.request("clip-360p.mp4", None).await.unwrap();
    assert_eq!(second.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_kills_live_streams() {
    let launcher = RecordingLauncher::new();
    let server = TestServer::with_demo_files(&launcher).await;
    let mut client = server.connect().await;
    client.negotiate(MediaFormat::Mp4, 10.0).await.unwrap();

    client.request("demo-240p.mp4", None).await.unwrap();
    assert_eq!(client.read_reply(WAIT).await.unwrap(), Some(ServerReply::Ready));

    server.stop().await;

    assert_eq!(
        launcher.events(),
        vec![
            LaunchEvent::started("demo-240p.mp4", Transport::Tcp),
            LaunchEvent::dropped("demo-240p.mp4"),
        ]
    );
    assert_eq!(launcher.live(), 0);
    tokio::time::timeout(WAIT, client.wait_closed())
        .await
        .expect("connection is closed after shutdown")
        .unwrap();
}
