//! Per-session owner of the active stream process.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{StreamHandle, StreamLauncher, StreamProcess, StreamResult, StreamStatus, StreamTarget};
use crate::catalog::{Rendition, RenditionKey};
use crate::media::Transport;

/// Released handles remembered for `status`; older ones report `Unknown`.
const RELEASED_HISTORY: usize = 16;

struct ActiveStream {
    handle: StreamHandle,
    key: RenditionKey,
    transport: Transport,
    process: Box<dyn StreamProcess>,
}

/// Owns at most one stream process for a session.
///
/// `start` always releases the current process before launching the next
/// one, so two processes of the same session are never alive together.
/// Dropping the supervisor drops the process, which kills it.
pub struct StreamSupervisor {
    launcher: Arc<dyn StreamLauncher>,
    target: StreamTarget,
    active: Option<ActiveStream>,
    released: VecDeque<StreamHandle>,
}

impl StreamSupervisor {
    pub fn new(launcher: Arc<dyn StreamLauncher>, target: StreamTarget) -> Self {
        Self {
            launcher,
            target,
            active: None,
            released: VecDeque::with_capacity(RELEASED_HISTORY),
        }
    }

    /// Stops the current stream, if any, then streams `rendition` over `transport`.
    ///
    /// A failed launch leaves the supervisor with no active stream.
    ///
    /// # Errors
    ///
    /// - `StreamError::StartFailed` - External process could not be launched
    pub async fn start(
        &mut self,
        rendition: &Rendition,
        transport: Transport,
    ) -> StreamResult<StreamHandle> {
        if let Some(previous) = self.active_handle() {
            self.stop(previous).await;
        }

        let process = self
            .launcher
            .launch(rendition, transport, &self.target)
            .await?;

        let handle = StreamHandle::new();
        tracing::info!(
            "Stream {} started: {} via {} to {}",
            handle,
            rendition.filename(),
            transport,
            self.target.url(transport)
        );

        self.active = Some(ActiveStream {
            handle,
            key: rendition.key.clone(),
            transport,
            process,
        });

        Ok(handle)
    }

    /// Stops the stream behind `handle`.
    ///
    /// Returns `true` when this call released the active handle, even if its
    /// process had already crashed. Stopping an unknown or already released
    /// handle does nothing.
    pub async fn stop(&mut self, handle: StreamHandle) -> bool {
        let Some(active) = self.active.take_if(|active| active.handle == handle) else {
            return false;
        };

        let ActiveStream {
            handle,
            key,
            mut process,
            ..
        } = active;

        if let Err(e) = process.terminate().await {
            tracing::warn!("Failed to stop stream {} ({}): {}", handle, key.filename(), e);
        }
        if self.released.len() == RELEASED_HISTORY {
            self.released.pop_front();
        }
        self.released.push_back(handle);
        tracing::info!("Stream {} stopped: {}", handle, key.filename());

        true
    }

    /// Stops whatever is active. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.active_handle() {
            self.stop(handle).await;
        }
    }

    /// Current lifecycle state of `handle`.
    pub fn status(&mut self, handle: StreamHandle) -> StreamStatus {
        if let Some(active) = self.active.as_mut()
            && active.handle == handle
        {
            return if active.process.has_exited() {
                StreamStatus::Exited
            } else {
                StreamStatus::Running
            };
        }

        if self.released.contains(&handle) {
            StreamStatus::Stopped
        } else {
            StreamStatus::Unknown
        }
    }

    /// Handle of the active stream, if any.
    pub fn active_handle(&self) -> Option<StreamHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    /// Rendition and transport of the active stream, if any.
    pub fn active_stream(&self) -> Option<(&RenditionKey, Transport)> {
        self.active
            .as_ref()
            .map(|active| (&active.key, active.transport))
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            tracing::debug!(
                "Dropping supervisor with live stream {} ({})",
                active.handle,
                active.key.filename()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LaunchEvent, RecordingLauncher, rendition_of};

    fn supervisor(launcher: &Arc<RecordingLauncher>) -> StreamSupervisor {
        StreamSupervisor::new(launcher.clone(), StreamTarget::new("127.0.0.1", 1234))
    }

    #[tokio::test]
    async fn test_start_replaces_previous_stream() {
        let launcher = Arc::new(RecordingLauncher::new());
        let mut supervisor = supervisor(&launcher);

        let first = supervisor
            .start(&rendition_of("a-480p.mp4"), Transport::Udp)
            .await
            .unwrap();
        let second = supervisor
            .start(&rendition_of("b-720p.mp4"), Transport::Rtp)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(
            launcher.events(),
            vec![
                LaunchEvent::started("a-480p.mp4", Transport::Udp),
                LaunchEvent::stopped("a-480p.mp4"),
                LaunchEvent::started("b-720p.mp4", Transport::Rtp),
            ]
        );
        assert_eq!(launcher.max_concurrent(), 1);
        assert_eq!(supervisor.status(first), StreamStatus::Stopped);
        assert_eq!(supervisor.status(second), StreamStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let launcher = Arc::new(RecordingLauncher::new());
        let mut supervisor = supervisor(&launcher);

        let handle = supervisor
            .start(&rendition_of("a-240p.mp4"), Transport::Tcp)
            .await
            .unwrap();

        assert!(supervisor.stop(handle).await);
        assert!(!supervisor.stop(handle).await);
        supervisor.shutdown().await;

        assert_eq!(launcher.events().len(), 2);
        assert_eq!(supervisor.active_handle(), None);
    }

    #[tokio::test]
    async fn test_crashed_stream_reports_exited_and_stops_quietly() {
        let launcher = Arc::new(RecordingLauncher::new());
        let mut supervisor = supervisor(&launcher);

        let handle = supervisor
            .start(&rendition_of("a-240p.mp4"), Transport::Tcp)
            .await
            .unwrap();
        launcher.crash("a-240p.mp4");

        assert_eq!(supervisor.status(handle), StreamStatus::Exited);
        assert!(supervisor.stop(handle).await);
        assert_eq!(
            launcher.events(),
            vec![
                LaunchEvent::started("a-240p.mp4", Transport::Tcp),
                LaunchEvent::crashed("a-240p.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_no_active_stream() {
        let launcher = Arc::new(RecordingLauncher::new().failing_on("b-720p.mp4"));
        let mut supervisor = supervisor(&launcher);

        supervisor
            .start(&rendition_of("a-480p.mp4"), Transport::Udp)
            .await
            .unwrap();
        let result = supervisor
            .start(&rendition_of("b-720p.mp4"), Transport::Rtp)
            .await;

        assert!(result.is_err());
        assert_eq!(supervisor.active_handle(), None);
        assert_eq!(
            launcher.events(),
            vec![
                LaunchEvent::started("a-480p.mp4", Transport::Udp),
                LaunchEvent::stopped("a-480p.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_released_history_is_bounded() {
        let launcher = Arc::new(RecordingLauncher::new());
        let mut supervisor = supervisor(&launcher);

        let mut handles = Vec::new();
        for _ in 0..=RELEASED_HISTORY + 1 {
            let handle = supervisor
                .start(&rendition_of("a-240p.mp4"), Transport::Tcp)
                .await
                .unwrap();
            handles.push(handle);
        }

        assert_eq!(supervisor.released.len(), RELEASED_HISTORY);
        assert_eq!(supervisor.status(handles[0]), StreamStatus::Unknown);
        assert_eq!(supervisor.status(handles[1]), StreamStatus::Stopped);
        assert_eq!(
            supervisor.status(handles[handles.len() - 2]),
            StreamStatus::Stopped
        );
        assert_eq!(
            supervisor.status(*handles.last().unwrap()),
            StreamStatus::Running
        );
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let launcher = Arc::new(RecordingLauncher::new());
        let mut supervisor = supervisor(&launcher);
        let stranger = StreamHandle::new();

        assert_eq!(supervisor.status(stranger), StreamStatus::Unknown);
        assert!(!supervisor.stop(stranger).await);
    }
}
