//! Shared harness: a dispatcher on an ephemeral loopback port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cascade_core::catalog::RenditionCatalog;
use cascade_core::client::CatalogClient;
use cascade_core::config::{CascadeConfig, ReadyHandshake};
use cascade_core::session::SessionContext;
use cascade_core::testing::{RecordingLauncher, catalog_of};
use cascade_core::usage::{NoopUsageRecorder, UsageRecorder};
use cascade_core::ConnectionDispatcher;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Time allowed for any single asynchronous expectation.
pub const WAIT: Duration = Duration::from_secs(2);

/// Titles used by most session tests.
pub const DEMO_FILES: &[&str] = &[
    "demo-240p.mp4",
    "demo-360p.mp4",
    "demo-480p.mp4",
    "demo-720p.mp4",
    "demo-1080p.mp4",
    "demo-720p.avi",
    "clip-240p.mp4",
    "clip-360p.mp4",
];

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Serves `catalog` with READY announcements enabled.
    pub async fn start(
        catalog: RenditionCatalog,
        launcher: &RecordingLauncher,
        usage: Arc<dyn UsageRecorder>,
    ) -> Self {
        let mut config = CascadeConfig::for_testing();
        config.server.ready_handshake = ReadyHandshake::Announce;

        let context = SessionContext::new(&config, catalog, Arc::new(launcher.clone()), usage);
        let dispatcher = ConnectionDispatcher::bind(config.server.listen_addr, context)
            .await
            .unwrap();
        let addr = dispatcher.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(dispatcher.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Serves [`DEMO_FILES`] without usage statistics.
    pub async fn with_demo_files(launcher: &RecordingLauncher) -> Self {
        Self::start(catalog_of(DEMO_FILES), launcher, Arc::new(NoopUsageRecorder)).await
    }

    pub async fn connect(&self) -> CatalogClient {
        CatalogClient::connect(self.addr).await.unwrap()
    }

    /// Stops accepting and aborts every live session.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(WAIT, &mut self.task)
            .await
            .expect("dispatcher stops in time")
            .unwrap();
    }
}
