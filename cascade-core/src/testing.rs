//! Test doubles and fixtures shared by unit and integration tests.
//!
//! Enabled for this crate's own tests and, for other crates, through the
//! `test-utils` feature.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::catalog::{
    CatalogError, CatalogResult, Rendition, RenditionCatalog, RenditionKey, TranscodeReport,
    Transcoder,
};
use crate::media::Transport;
use crate::policy::PixelDimensions;
use crate::stream::{StreamError, StreamLauncher, StreamProcess, StreamResult, StreamTarget};

/// Creates empty placeholder files named `names` inside `dir`.
pub fn write_fixture_files(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::write(dir.join(name), b"fixture").expect("fixture file is writable");
    }
}

/// Builds a rendition for a canonical filename stored under `videos/`.
pub fn rendition_of(filename: &str) -> Rendition {
    let key = RenditionKey::parse_filename(filename).expect("fixture filename is canonical");
    Rendition {
        key,
        path: PathBuf::from("videos").join(filename),
        synthesized: false,
    }
}

/// Builds an in-memory catalog holding exactly `filenames`, in order.
pub fn catalog_of(filenames: &[&str]) -> RenditionCatalog {
    RenditionCatalog::from_renditions(
        "videos",
        filenames.iter().map(|name| rendition_of(name)).collect(),
    )
}

/// Creates a temporary content directory holding placeholder `names`.
pub fn content_dir_with(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temporary directory can be created");
    write_fixture_files(dir.path(), names);
    dir
}

/// One transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCall {
    pub input: PathBuf,
    pub output: PathBuf,
    pub dimensions: PixelDimensions,
}

/// Transcoder that writes placeholder outputs and records every call.
#[derive(Debug, Default)]
pub struct StubTranscoder {
    calls: Mutex<Vec<TranscodeCall>>,
    failing: HashSet<String>,
}

impl StubTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes synthesis of `filename` fail.
    pub fn failing_on(mut self, filename: &str) -> Self {
        self.failing.insert(filename.to_string());
        self
    }

    pub fn calls(&self) -> Vec<TranscodeCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn transcode(
        &self,
        input_path: &Path,
        output_path: &Path,
        dimensions: PixelDimensions,
    ) -> CatalogResult<TranscodeReport> {
        self.calls.lock().push(TranscodeCall {
            input: input_path.to_path_buf(),
            output: output_path.to_path_buf(),
            dimensions,
        });

        let filename = output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&filename) {
            return Err(CatalogError::SynthesisFailed {
                output: output_path.to_path_buf(),
                reason: "stub failure".to_string(),
            });
        }

        let contents = format!("synthesized {}", dimensions.as_size_arg());
        tokio::fs::write(output_path, &contents)
            .await
            .map_err(|e| CatalogError::SynthesisFailed {
                output: output_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(TranscodeReport {
            output_size: contents.len() as u64,
            processing_time: 0.0,
        })
    }
}

/// Lifecycle event observed by [`RecordingLauncher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    Started { filename: String, transport: Transport },
    Stopped { filename: String },
    Crashed { filename: String },
    Dropped { filename: String },
}

impl LaunchEvent {
    pub fn started(filename: &str, transport: Transport) -> Self {
        Self::Started {
            filename: filename.to_string(),
            transport,
        }
    }

    pub fn stopped(filename: &str) -> Self {
        Self::Stopped {
            filename: filename.to_string(),
        }
    }

    pub fn crashed(filename: &str) -> Self {
        Self::Crashed {
            filename: filename.to_string(),
        }
    }

    pub fn dropped(filename: &str) -> Self {
        Self::Dropped {
            filename: filename.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    events: Vec<LaunchEvent>,
    targets: Vec<StreamTarget>,
    crashed: HashSet<String>,
    live: HashMap<String, usize>,
    concurrent: usize,
    max_concurrent: usize,
}

impl RecorderState {
    fn release(&mut self, filename: &str) {
        if let Some(count) = self.live.get_mut(filename) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(filename);
            }
        }
        self.concurrent = self.concurrent.saturating_sub(1);
    }
}

/// Launcher that records start/stop calls instead of spawning processes.
#[derive(Debug, Default, Clone)]
pub struct RecordingLauncher {
    state: Arc<Mutex<RecorderState>>,
    failing: Arc<HashSet<String>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every launch of `filename` fail.
    pub fn failing_on(self, filename: &str) -> Self {
        let mut failing = (*self.failing).clone();
        failing.insert(filename.to_string());
        Self {
            state: self.state,
            failing: Arc::new(failing),
        }
    }

    pub fn events(&self) -> Vec<LaunchEvent> {
        self.state.lock().events.clone()
    }

    pub fn targets(&self) -> Vec<StreamTarget> {
        self.state.lock().targets.clone()
    }

    /// Highest number of simultaneously live processes seen so far.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_concurrent
    }

    /// Number of processes currently alive.
    pub fn live(&self) -> usize {
        self.state.lock().concurrent
    }

    /// Simulates the live process for `filename` exiting on its own.
    pub fn crash(&self, filename: &str) {
        let mut state = self.state.lock();
        if state.live.contains_key(filename) && state.crashed.insert(filename.to_string()) {
            state.release(filename);
            state.events.push(LaunchEvent::crashed(filename));
        }
    }

    /// Polls until at least `count` events were recorded or `timeout` elapses.
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<LaunchEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl StreamLauncher for RecordingLauncher {
    async fn launch(
        &self,
        rendition: &Rendition,
        transport: Transport,
        target: &StreamTarget,
    ) -> StreamResult<Box<dyn StreamProcess>> {
        let filename = rendition.filename();
        if self.failing.contains(&filename) {
            return Err(StreamError::StartFailed {
                filename,
                reason: "recording launcher configured to fail".to_string(),
            });
        }

        let mut state = self.state.lock();
        state.events.push(LaunchEvent::started(&filename, transport));
        state.targets.push(target.clone());
        state.crashed.remove(&filename);
        *state.live.entry(filename.clone()).or_default() += 1;
        state.concurrent += 1;
        state.max_concurrent = state.max_concurrent.max(state.concurrent);

        Ok(Box::new(RecordedProcess {
            filename,
            state: self.state.clone(),
            finished: false,
        }))
    }
}

struct RecordedProcess {
    filename: String,
    state: Arc<Mutex<RecorderState>>,
    finished: bool,
}

#[async_trait]
impl StreamProcess for RecordedProcess {
    async fn terminate(&mut self) -> StreamResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut state = self.state.lock();
        if state.crashed.remove(&self.filename) {
            return Ok(());
        }
        state.release(&self.filename);
        state.events.push(LaunchEvent::stopped(&self.filename));
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.finished || self.state.lock().crashed.contains(&self.filename)
    }
}

impl Drop for RecordedProcess {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.state.lock();
        if state.crashed.remove(&self.filename) {
            return;
        }
        state.release(&self.filename);
        state.events.push(LaunchEvent::dropped(&self.filename));
    }
}
