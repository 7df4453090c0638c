//! Launching the external transport process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{StreamError, StreamResult};
use crate::catalog::Rendition;
use crate::media::Transport;

/// Network destination the stream process sends media to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub host: String,
    pub port: u16,
}

impl StreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Output URL for `transport`, e.g. `udp://10.0.0.7:1234`.
    pub fn url(&self, transport: Transport) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", transport.scheme(), self.host, self.port)
        } else {
            format!("{}://{}:{}", transport.scheme(), self.host, self.port)
        }
    }
}

/// Starts stream processes.
///
/// Implementations are shared across sessions; each launched process is
/// owned by exactly one [`super::StreamSupervisor`].
#[async_trait]
pub trait StreamLauncher: Send + Sync {
    /// Starts streaming `rendition` over `transport` to `target`.
    ///
    /// # Errors
    ///
    /// - `StreamError::StartFailed` - Process could not be spawned
    async fn launch(
        &self,
        rendition: &Rendition,
        transport: Transport,
        target: &StreamTarget,
    ) -> StreamResult<Box<dyn StreamProcess>>;
}

/// A running (or finished) stream process.
#[async_trait]
pub trait StreamProcess: Send {
    /// Stops the process. Calling this on an exited process is a no-op.
    ///
    /// # Errors
    ///
    /// - `StreamError::StopFailed` - Process could not be signalled or reaped
    async fn terminate(&mut self) -> StreamResult<()>;

    /// Whether the process has ended on its own. Never blocks.
    fn has_exited(&mut self) -> bool;
}

/// Launcher that runs ffmpeg in real-time mode (`-re`) as an MPEG-TS sender.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegLauncher {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Arguments passed to ffmpeg for one stream.
    pub fn stream_args(
        rendition: &Rendition,
        transport: Transport,
        target: &StreamTarget,
    ) -> Vec<OsString> {
        let muxer = match transport {
            Transport::Tcp | Transport::Udp => "mpegts",
            Transport::Rtp => "rtp_mpegts",
        };

        vec![
            "-re".into(),
            "-i".into(),
            rendition.path.clone().into_os_string(),
            "-f".into(),
            muxer.into(),
            target.url(transport).into(),
        ]
    }
}

#[async_trait]
impl StreamLauncher for FfmpegLauncher {
    async fn launch(
        &self,
        rendition: &Rendition,
        transport: Transport,
        target: &StreamTarget,
    ) -> StreamResult<Box<dyn StreamProcess>> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(Self::stream_args(rendition, transport, target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Executing stream command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| StreamError::StartFailed {
            filename: rendition.filename(),
            reason: e.to_string(),
        })?;

        // ffmpeg blocks once an undrained stderr pipe fills up
        if let Some(stderr) = child.stderr.take() {
            let filename = rendition.filename();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!("ffmpeg[{}]: {}", filename, line);
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child }))
    }
}

/// Child process handle for a running ffmpeg stream.
struct FfmpegProcess {
    child: Child,
}

#[async_trait]
impl StreamProcess for FfmpegProcess {
    async fn terminate(&mut self) -> StreamResult<()> {
        if self.has_exited() {
            return Ok(());
        }

        self.child
            .kill()
            .await
            .map_err(|e| StreamError::StopFailed {
                reason: e.to_string(),
            })
    }

    fn has_exited(&mut self) -> bool {
        // An unreadable status means the child is gone as far as we can tell
        !matches!(self.child.try_wait(), Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RenditionKey;
    use crate::media::{MediaFormat, Resolution};

    fn rendition() -> Rendition {
        Rendition {
            key: RenditionKey::new("demo", Resolution::P720, MediaFormat::Mp4),
            path: PathBuf::from("videos/demo-720p.mp4"),
            synthesized: false,
        }
    }

    #[test]
    fn test_target_urls() {
        let target = StreamTarget::new("localhost", 1234);
        assert_eq!(target.url(Transport::Udp), "udp://localhost:1234");
        assert_eq!(target.url(Transport::Tcp), "tcp://localhost:1234");
        assert_eq!(
            StreamTarget::new("::1", 5000).url(Transport::Rtp),
            "rtp://[::1]:5000"
        );
    }

    #[test]
    fn test_stream_args_pick_muxer_per_transport() {
        let target = StreamTarget::new("127.0.0.1", 1234);

        let udp = FfmpegLauncher::stream_args(&rendition(), Transport::Udp, &target);
        assert_eq!(
            udp,
            vec![
                OsString::from("-re"),
                OsString::from("-i"),
                OsString::from("videos/demo-720p.mp4"),
                OsString::from("-f"),
                OsString::from("mpegts"),
                OsString::from("udp://127.0.0.1:1234"),
            ]
        );

        let rtp = FfmpegLauncher::stream_args(&rendition(), Transport::Rtp, &target);
        assert_eq!(rtp[4], OsString::from("rtp_mpegts"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let launcher = FfmpegLauncher::new("/nonexistent/cascade-ffmpeg");
        let result = launcher
            .launch(
                &rendition(),
                Transport::Udp,
                &StreamTarget::new("127.0.0.1", 1234),
            )
            .await;

        assert!(matches!(result, Err(StreamError::StartFailed { .. })));
    }
}
