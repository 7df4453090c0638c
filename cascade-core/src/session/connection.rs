//! Drives a [`Session`] over a line-oriented byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{Session, SessionError, SessionOutcome, SessionTimeouts};

/// Runs `session` until the client disconnects, a timeout fires or a
/// session-fatal error occurs.
///
/// Lines are handled strictly in arrival order: one line is read, fully
/// processed and answered before the next is read. The session is always
/// closed (and its stream released) before this returns.
pub async fn run_session<R, W>(
    mut session: Session,
    reader: R,
    mut writer: W,
    timeouts: SessionTimeouts,
) -> SessionOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    let outcome = loop {
        let next_line = match session.read_timeout(&timeouts) {
            Some(limit) => match tokio::time::timeout(limit, lines.next_line()).await {
                Ok(result) => result,
                Err(_) => break SessionOutcome::TimedOut { after: limit },
            },
            None => lines.next_line().await,
        };

        let line = match next_line {
            Ok(Some(line)) => line,
            Ok(None) => break SessionOutcome::ClientDisconnected,
            Err(e) => break SessionOutcome::Failed(SessionError::Io(e)),
        };
        tracing::trace!("Session {} <- {:?}", session.id(), line);

        let reaction = match session.handle_line(&line).await {
            Ok(reaction) => reaction,
            Err(e) => break SessionOutcome::Failed(e),
        };

        if let Err(e) = write_lines(&mut writer, &reaction.replies).await {
            break SessionOutcome::Failed(SessionError::Io(e));
        }

        if reaction.hang_up {
            break SessionOutcome::ServerClosed;
        }
    };

    session.close().await;
    if let Err(e) = writer.shutdown().await {
        tracing::trace!("Session {}: shutdown after close failed: {}", session.id(), e);
    }

    match &outcome {
        SessionOutcome::ClientDisconnected | SessionOutcome::ServerClosed => {
            tracing::info!("Session {} finished: {:?}", session.id(), outcome);
        }
        SessionOutcome::TimedOut { after } => {
            tracing::info!("Session {} timed out after {:?}", session.id(), after);
        }
        SessionOutcome::Failed(e) => {
            tracing::warn!("Session {} terminated: {}", session.id(), e);
        }
    }

    outcome
}

async fn write_lines<W>(writer: &mut W, lines: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if lines.is_empty() {
        return Ok(());
    }

    let mut payload = String::new();
    for line in lines {
        payload.push_str(line);
        payload.push('\n');
    }
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, duplex};

    use super::*;
    use crate::config::{ReadyHandshake, StreamConfig};
    use crate::media::Transport;
    use crate::policy::SelectionPolicy;
    use crate::session::{ConnectionId, SessionContext};
    use crate::testing::{LaunchEvent, RecordingLauncher, catalog_of};
    use crate::usage::NoopUsageRecorder;

    fn timeouts() -> SessionTimeouts {
        SessionTimeouts {
            handshake: Duration::from_secs(5),
            idle: None,
        }
    }

    fn new_session(launcher: &RecordingLauncher) -> Session {
        let context = SessionContext {
            catalog: Arc::new(catalog_of(&["a-240p.mp4", "a-480p.mp4", "b-720p.mp4"])),
            policy: Arc::new(SelectionPolicy::default()),
            launcher: Arc::new(launcher.clone()),
            usage: Arc::new(NoopUsageRecorder),
            stream: StreamConfig::default(),
            ready_handshake: ReadyHandshake::Disabled,
            timeouts: timeouts(),
        };
        Session::new(ConnectionId(1), "127.0.0.1:40000".parse().unwrap(), &context)
    }

    async fn drive(launcher: &RecordingLauncher, input: &str) -> (SessionOutcome, String) {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        let outcome = run_session(new_session(launcher), server_read, server_write, timeouts()).await;

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        (outcome, output)
    }

    #[tokio::test]
    async fn test_full_session_over_stream() {
        let launcher = RecordingLauncher::new();
        let (outcome, output) = drive(&launcher, "mp4;10.0\na-480p.mp4;UDP\nb-720p.mp4;RTP\n").await;

        assert!(matches!(outcome, SessionOutcome::ClientDisconnected));
        assert_eq!(output, "a-240p.mp4\na-480p.mp4\nb-720p.mp4\nEND\n");
        assert_eq!(
            launcher.events(),
            vec![
                LaunchEvent::started("a-480p.mp4", Transport::Udp),
                LaunchEvent::stopped("a-480p.mp4"),
                LaunchEvent::started("b-720p.mp4", Transport::Rtp),
                LaunchEvent::stopped("b-720p.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_first_line_emits_nothing() {
        let launcher = RecordingLauncher::new();
        let (outcome, output) = drive(&launcher, "mp4\nmp4;10.0\n").await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(SessionError::MalformedRequest { .. })
        ));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_bandwidth_ends_session() {
        let launcher = RecordingLauncher::new();
        let (outcome, output) = drive(&launcher, "mp4;0.1\na-240p.mp4;TCP\n").await;

        assert!(matches!(outcome, SessionOutcome::ServerClosed));
        assert_eq!(output, "No supported resolution for your speed.\nEND\n");
        assert!(launcher.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_rendition_terminates_and_releases_stream() {
        let launcher = RecordingLauncher::new();
        let (outcome, _) = drive(&launcher, "mp4;10.0\na-240p.mp4;\nnope-240p.mp4;TCP\n").await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(SessionError::UnknownRendition { .. })
        ));
        assert_eq!(launcher.live(), 0);
        assert_eq!(launcher.events().last(), Some(&LaunchEvent::stopped("a-240p.mp4")));
    }

    #[tokio::test]
    async fn test_handshake_timeout_closes_session() {
        let launcher = RecordingLauncher::new();
        let (_client, server) = duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);

        let outcome = run_session(
            new_session(&launcher),
            server_read,
            server_write,
            SessionTimeouts {
                handshake: Duration::from_millis(50),
                idle: None,
            },
        )
        .await;

        assert!(matches!(outcome, SessionOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_idle_timeout_while_streaming_stops_stream() {
        let launcher = RecordingLauncher::new();
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"mp4;10.0\na-240p.mp4;TCP\n")
            .await
            .unwrap();

        let idle = Duration::from_millis(50);
        let outcome = run_session(
            new_session(&launcher),
            server_read,
            server_write,
            SessionTimeouts {
                handshake: Duration::from_secs(5),
                idle: Some(idle),
            },
        )
        .await;

        match outcome {
            SessionOutcome::TimedOut { after } => assert_eq!(after, idle),
            other => panic!("expected an idle timeout, got {other:?}"),
        }
        assert_eq!(
            launcher.events(),
            vec![
                LaunchEvent::started("a-240p.mp4", Transport::Tcp),
                LaunchEvent::stopped("a-240p.mp4"),
            ]
        );
        assert_eq!(launcher.live(), 0);

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "a-240p.mp4\na-480p.mp4\nb-720p.mp4\nEND\n");
    }
}
