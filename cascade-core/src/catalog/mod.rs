//! Rendition catalog.
//!
//! The catalog is built once at startup from a content directory. Any title
//! found on disk is completed to the full (resolution, format) matrix up to
//! its native resolution by synthesizing the missing files through a
//! [`Transcoder`]. After the build the catalog is immutable and shared
//! read-only between all sessions.

pub mod rendition;
pub mod scan;
pub mod transcoder;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use rendition::{Rendition, RenditionKey};
pub use scan::{ContentScan, SynthesisJob, TitleSummary, plan_missing, scan_content_dir};
pub use transcoder::{FfmpegTranscoder, TranscodeReport, Transcoder};

use crate::media::{MediaFormat, Resolution};
use crate::policy::SelectionPolicy;

/// Errors raised while building the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Content directory is absent or not a directory.
    #[error("content directory not found: {path}")]
    ContentDirMissing { path: PathBuf },

    /// External transcode tool failed for one rendition.
    #[error("failed to synthesize {output}: {reason}")]
    SynthesisFailed { output: PathBuf, reason: String },

    /// I/O error while reading the content directory.
    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Read-only index of every rendition available to clients.
#[derive(Debug, Clone, Default)]
pub struct RenditionCatalog {
    content_dir: PathBuf,
    renditions: Vec<Rendition>,
    index: HashMap<RenditionKey, usize>,
    titles: Vec<TitleSummary>,
    missing: Vec<RenditionKey>,
}

impl RenditionCatalog {
    /// Scans `content_dir` and synthesizes every missing rendition.
    ///
    /// Synthesis runs sequentially. A failed rendition is logged, recorded in
    /// [`RenditionCatalog::missing`] and left out of the catalog; the build
    /// itself carries on.
    ///
    /// # Errors
    ///
    /// - `CatalogError::ContentDirMissing` - Directory does not exist
    /// - `CatalogError::Io` - Directory could not be read
    pub async fn build(
        content_dir: &Path,
        transcoder: &dyn Transcoder,
        policy: &SelectionPolicy,
    ) -> CatalogResult<Self> {
        let scan = scan_content_dir(content_dir).await?;
        if scan.titles.is_empty() {
            tracing::warn!("Content directory {} has no renditions", content_dir.display());
        }

        let mut catalog = Self::from_scan(content_dir, &scan);
        let total = scan.jobs.len();

        for (position, job) in scan.jobs.into_iter().enumerate() {
            tracing::info!(
                "Synthesizing {} from {} ({}/{})",
                job.key.filename(),
                job.source.display(),
                position + 1,
                total
            );

            let dimensions = policy.dimensions(job.key.resolution);
            match transcoder.transcode(&job.source, &job.output, dimensions).await {
                Ok(report) => {
                    tracing::debug!(
                        "Synthesized {}: {} bytes in {:.2}s",
                        job.output.display(),
                        report.output_size,
                        report.processing_time
                    );
                    catalog.insert(Rendition {
                        key: job.key,
                        path: job.output,
                        synthesized: true,
                    });
                }
                Err(e) => {
                    tracing::error!("Synthesis failed for {}: {}", job.key.filename(), e);
                    catalog.missing.push(job.key);
                }
            }
        }

        tracing::info!(
            "Catalog ready: {} renditions across {} titles ({} missing)",
            catalog.len(),
            catalog.titles.len(),
            catalog.missing.len()
        );

        Ok(catalog)
    }

    /// Indexes what is on disk without synthesizing anything.
    ///
    /// Planned renditions are reported through [`RenditionCatalog::missing`].
    ///
    /// # Errors
    ///
    /// - `CatalogError::ContentDirMissing` - Directory does not exist
    /// - `CatalogError::Io` - Directory could not be read
    pub async fn scan_only(content_dir: &Path) -> CatalogResult<Self> {
        let scan = scan_content_dir(content_dir).await?;
        let mut catalog = Self::from_scan(content_dir, &scan);
        catalog.missing = scan.jobs.into_iter().map(|job| job.key).collect();
        Ok(catalog)
    }

    /// Builds a catalog from an explicit list, keeping the given order.
    pub fn from_renditions(content_dir: impl Into<PathBuf>, renditions: Vec<Rendition>) -> Self {
        let mut catalog = Self {
            content_dir: content_dir.into(),
            ..Self::default()
        };
        for rendition in renditions {
            let title = rendition.title().to_string();
            let resolution = rendition.resolution();
            match catalog.titles.iter_mut().find(|summary| summary.title == title) {
                Some(summary) => summary.native = summary.native.max(resolution),
                None => catalog.titles.push(TitleSummary {
                    title,
                    native: resolution,
                }),
            }
            catalog.insert(rendition);
        }
        catalog
    }

    fn from_scan(content_dir: &Path, scan: &ContentScan) -> Self {
        let mut catalog = Self {
            content_dir: content_dir.to_path_buf(),
            titles: scan.titles.clone(),
            ..Self::default()
        };
        for rendition in &scan.renditions {
            catalog.insert(rendition.clone());
        }
        catalog
    }

    fn insert(&mut self, rendition: Rendition) {
        if self.index.contains_key(&rendition.key) {
            return;
        }
        self.index.insert(rendition.key.clone(), self.renditions.len());
        self.renditions.push(rendition);
    }

    /// Renditions of `format` at or below `max_resolution`, in catalog order.
    ///
    /// An empty result is a valid answer, not an error.
    pub fn query(&self, format: MediaFormat, max_resolution: Resolution) -> Vec<&Rendition> {
        self.renditions
            .iter()
            .filter(|r| r.format() == format && r.resolution() <= max_resolution)
            .collect()
    }

    /// Looks up a rendition by its identity.
    pub fn get(&self, key: &RenditionKey) -> Option<&Rendition> {
        self.index.get(key).map(|&position| &self.renditions[position])
    }

    /// Looks up a rendition by its client-facing filename.
    ///
    /// Only the canonical spelling matches: `demo-0720p.mp4` or
    /// `demo-720p.MP4` parse to the same key but are not catalog entries.
    pub fn lookup(&self, filename: &str) -> Option<&Rendition> {
        let filename = filename.trim();
        RenditionKey::parse_filename(filename)
            .and_then(|key| self.get(&key))
            .filter(|rendition| rendition.filename() == filename)
    }

    /// Native resolution of `title`, if the title is known.
    pub fn native_resolution(&self, title: &str) -> Option<Resolution> {
        self.titles
            .iter()
            .find(|summary| summary.title == title)
            .map(|summary| summary.native)
    }

    /// Every rendition in catalog order.
    pub fn renditions(&self) -> &[Rendition] {
        &self.renditions
    }

    /// Titles in discovery order.
    pub fn titles(&self) -> &[TitleSummary] {
        &self.titles
    }

    /// Renditions that should exist but could not be synthesized.
    pub fn missing(&self) -> &[RenditionKey] {
        &self.missing
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }

    /// Serializable snapshot used by `cascade scan --json`.
    pub fn view(&self) -> CatalogView<'_> {
        CatalogView {
            content_dir: &self.content_dir,
            titles: &self.titles,
            renditions: &self.renditions,
            missing: &self.missing,
        }
    }
}

/// JSON shape of a catalog.
#[derive(Debug, Serialize)]
pub struct CatalogView<'a> {
    pub content_dir: &'a Path,
    pub titles: &'a [TitleSummary],
    pub renditions: &'a [Rendition],
    pub missing: &'a [RenditionKey],
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::testing::{StubTranscoder, catalog_of, write_fixture_files};

    #[tokio::test]
    async fn test_build_completes_full_matrix() {
        let temp_dir = tempdir().unwrap();
        write_fixture_files(temp_dir.path(), &["demo-720p.mp4", "clip-360p.avi"]);

        let transcoder = StubTranscoder::new();
        let catalog =
            RenditionCatalog::build(temp_dir.path(), &transcoder, &SelectionPolicy::default())
                .await
                .unwrap();

        for summary in catalog.titles() {
            for resolution in Resolution::ALL {
                for format in MediaFormat::ALL {
                    let key = RenditionKey::new(&summary.title, resolution, format);
                    assert_eq!(
                        catalog.get(&key).is_some(),
                        resolution <= summary.native,
                        "unexpected availability for {}",
                        key.filename()
                    );
                }
            }
        }
        assert_eq!(catalog.len(), 4 * 3 + 2 * 3);
        assert!(catalog.missing().is_empty());
        assert!(temp_dir.path().join("demo-240p.mkv").exists());
    }

    #[tokio::test]
    async fn test_synthesis_uses_fixed_dimensions() {
        let temp_dir = tempdir().unwrap();
        write_fixture_files(temp_dir.path(), &["demo-480p.mkv"]);

        let transcoder = StubTranscoder::new();
        RenditionCatalog::build(temp_dir.path(), &transcoder, &SelectionPolicy::default())
            .await
            .unwrap();

        let calls = transcoder.calls();
        assert_eq!(calls.len(), 8);
        let call = calls
            .iter()
            .find(|call| call.output.ends_with("demo-360p.mp4"))
            .unwrap();
        assert_eq!(call.dimensions.as_size_arg(), "640x360");
        assert!(call.input.ends_with("demo-480p.mkv"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_leaves_triple_absent() {
        let temp_dir = tempdir().unwrap();
        write_fixture_files(temp_dir.path(), &["demo-360p.mp4"]);

        let transcoder = StubTranscoder::new().failing_on("demo-240p.avi");
        let catalog =
            RenditionCatalog::build(temp_dir.path(), &transcoder, &SelectionPolicy::default())
                .await
                .unwrap();

        assert!(catalog.lookup("demo-240p.avi").is_none());
        assert!(catalog.lookup("demo-240p.mkv").is_some());
        assert_eq!(catalog.missing().len(), 1);
        assert_eq!(catalog.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_content_dir_is_fatal() {
        let temp_dir = tempdir().unwrap();
        let result = RenditionCatalog::build(
            &temp_dir.path().join("videos"),
            &StubTranscoder::new(),
            &SelectionPolicy::default(),
        )
        .await;

        assert!(matches!(result, Err(CatalogError::ContentDirMissing { .. })));
    }

    #[tokio::test]
    async fn test_empty_content_dir_yields_empty_catalog() {
        let temp_dir = tempdir().unwrap();
        let catalog = RenditionCatalog::build(
            temp_dir.path(),
            &StubTranscoder::new(),
            &SelectionPolicy::default(),
        )
        .await
        .unwrap();

        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_scan_only_reports_planned_renditions() {
        let temp_dir = tempdir().unwrap();
        write_fixture_files(temp_dir.path(), &["demo-240p.mp4"]);

        let catalog = RenditionCatalog::scan_only(temp_dir.path()).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.missing().len(), 2);
        assert!(!temp_dir.path().join("demo-240p.avi").exists());

        let plan = plan_missing(temp_dir.path()).await.unwrap();
        let outputs: Vec<String> = plan.iter().map(|job| job.key.filename()).collect();
        assert_eq!(outputs, vec!["demo-240p.avi", "demo-240p.mkv"]);
    }

    #[test]
    fn test_lookup_requires_canonical_filename() {
        let catalog = catalog_of(&["demo-720p.mp4"]);

        assert!(catalog.lookup("demo-720p.mp4").is_some());
        assert!(catalog.lookup(" demo-720p.mp4 ").is_some());
        assert!(catalog.lookup("demo-000720p.mp4").is_none());
        assert!(catalog.lookup("demo-0720p.mp4").is_none());
        assert!(catalog.lookup("demo-720p.MP4").is_none());
    }

    #[test]
    fn test_query_filters_by_format_and_ceiling_in_order() {
        let catalog = crate::testing::catalog_of(&[
            "b-720p.mp4",
            "a-240p.mp4",
            "a-240p.mkv",
            "b-240p.mp4",
            "a-480p.mp4",
        ]);

        let names: Vec<String> = catalog
            .query(MediaFormat::Mp4, Resolution::P480)
            .into_iter()
            .map(Rendition::filename)
            .collect();
        assert_eq!(names, vec!["a-240p.mp4", "b-240p.mp4", "a-480p.mp4"]);

        assert!(catalog.query(MediaFormat::Avi, Resolution::P1080).is_empty());
        assert_eq!(catalog.native_resolution("b"), Some(Resolution::P720));
    }

    #[test]
    fn test_view_serializes_tiers_and_formats_as_text() {
        let catalog = crate::testing::catalog_of(&["demo-720p.mkv"]);
        let json = serde_json::to_value(catalog.view()).unwrap();

        assert_eq!(json["titles"][0]["native"], "720p");
        assert_eq!(json["renditions"][0]["key"]["format"], "mkv");
        assert_eq!(json["renditions"][0]["synthesized"], false);
        assert_eq!(json["missing"].as_array().map(Vec::len), Some(0));
    }
}
