//! Content directory scanning and synthesis planning.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::rendition::{ParsedName, Rendition, RenditionKey};
use super::{CatalogError, CatalogResult};
use crate::media::{MediaFormat, Resolution};

/// A file that can seed synthesis for its title.
#[derive(Debug, Clone)]
struct SourceEntry {
    path: PathBuf,
    height: u32,
}

#[derive(Debug)]
struct TitleGroup {
    title: String,
    native: Resolution,
    sources: Vec<SourceEntry>,
}

impl TitleGroup {
    /// Highest-resolution source, earliest discovered on ties.
    fn best_source(&self) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .reduce(|best, entry| if entry.height > best.height { entry } else { best })
    }
}

/// Native resolution of one title as discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleSummary {
    pub title: String,
    pub native: Resolution,
}

/// One missing rendition and the file it will be derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisJob {
    pub key: RenditionKey,
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Everything learned from one pass over the content directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentScan {
    /// Servable renditions found on disk, in discovery order
    pub renditions: Vec<Rendition>,
    /// Titles in discovery order
    pub titles: Vec<TitleSummary>,
    /// Renditions that must be synthesized to complete every title's matrix
    pub jobs: Vec<SynthesisJob>,
}

/// Scans `dir` (non-recursively) and plans the missing renditions.
///
/// Entries are visited sorted by file name so discovery order is stable.
///
/// # Errors
///
/// - `CatalogError::ContentDirMissing` - Directory does not exist or is not a directory
/// - `CatalogError::Io` - Directory could not be read
pub async fn scan_content_dir(dir: &Path) -> CatalogResult<ContentScan> {
    match tokio::fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => {
            return Err(CatalogError::ContentDirMissing {
                path: dir.to_path_buf(),
            });
        }
    }

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| CatalogError::Io {
            operation: format!("read {}", dir.display()),
            source,
        })?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| CatalogError::Io {
            operation: format!("read entry in {}", dir.display()),
            source,
        })?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if is_file {
            paths.push(entry.path());
        }
    }
    paths.sort();

    Ok(plan_from_paths(dir, &paths))
}

/// Renditions that a build of `dir` would synthesize, without running them.
///
/// # Errors
///
/// - `CatalogError::ContentDirMissing` - Directory does not exist or is not a directory
/// - `CatalogError::Io` - Directory could not be read
pub async fn plan_missing(dir: &Path) -> CatalogResult<Vec<SynthesisJob>> {
    Ok(scan_content_dir(dir).await?.jobs)
}

/// Groups `paths` by title and computes the synthesis plan.
fn plan_from_paths(dir: &Path, paths: &[PathBuf]) -> ContentScan {
    let mut groups: Vec<TitleGroup> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut renditions = Vec::new();
    let mut present: HashSet<RenditionKey> = HashSet::new();

    for path in paths {
        let Some(parsed) = ParsedName::from_path(path) else {
            tracing::debug!("Ignoring {}: name does not match <title>-<N>p.<ext>", path.display());
            continue;
        };
        let Some(native) = Resolution::highest_at_or_below(parsed.height) else {
            tracing::warn!(
                "Ignoring {}: {}p is below the lowest supported tier",
                path.display(),
                parsed.height
            );
            continue;
        };

        let index = *group_index.entry(parsed.title.clone()).or_insert_with(|| {
            groups.push(TitleGroup {
                title: parsed.title.clone(),
                native,
                sources: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[index];
        group.native = group.native.max(native);
        group.sources.push(SourceEntry {
            path: path.clone(),
            height: parsed.height,
        });

        let servable = Resolution::from_height(parsed.height)
            .zip(parsed.extension.parse::<MediaFormat>().ok())
            .map(|(resolution, format)| RenditionKey::new(&parsed.title, resolution, format));
        match servable {
            Some(key) if present.insert(key.clone()) => renditions.push(Rendition {
                key,
                path: path.clone(),
                synthesized: false,
            }),
            Some(key) => {
                tracing::warn!("Duplicate rendition {} at {}", key.filename(), path.display());
            }
            None => {
                tracing::debug!("{} is a synthesis source only", path.display());
            }
        }
    }

    let mut jobs = Vec::new();
    for group in &groups {
        let Some(source) = group.best_source() else {
            continue;
        };
        for resolution in Resolution::ALL.into_iter().filter(|r| *r <= group.native) {
            for format in MediaFormat::ALL {
                let key = RenditionKey::new(&group.title, resolution, format);
                if present.contains(&key) {
                    continue;
                }
                jobs.push(SynthesisJob {
                    output: dir.join(key.filename()),
                    source: source.path.clone(),
                    key,
                });
            }
        }
    }

    let titles = groups
        .into_iter()
        .map(|group| TitleSummary {
            title: group.title,
            native: group.native,
        })
        .collect();

    ContentScan {
        renditions,
        titles,
        jobs,
    }
}
