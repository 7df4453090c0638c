//! Rendition identity and the `<title>-<NNN>p.<ext>` filename grammar.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::media::{MediaFormat, Resolution};

static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>.+)-(?P<height>\d+)p\.(?P<ext>\w+)$")
        .expect("filename pattern is a valid regex")
});

/// Identity of a rendition independent of where it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RenditionKey {
    pub title: String,
    pub resolution: Resolution,
    pub format: MediaFormat,
}

impl RenditionKey {
    pub fn new(title: impl Into<String>, resolution: Resolution, format: MediaFormat) -> Self {
        Self {
            title: title.into(),
            resolution,
            format,
        }
    }

    /// Canonical filename, e.g. `demo-720p.mp4`.
    pub fn filename(&self) -> String {
        format!("{}-{}.{}", self.title, self.resolution, self.format)
    }

    /// Parses a canonical filename back into a key.
    ///
    /// Returns `None` when the name does not follow the grammar or names a
    /// resolution or format outside the supported sets.
    pub fn parse_filename(filename: &str) -> Option<Self> {
        let parsed = ParsedName::parse(filename)?;
        let resolution = Resolution::from_height(parsed.height)?;
        let format = parsed.extension.parse().ok()?;
        Some(Self::new(parsed.title, resolution, format))
    }
}

/// One concrete encoded file in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendition {
    pub key: RenditionKey,
    pub path: PathBuf,
    /// Whether this file was produced by startup synthesis.
    pub synthesized: bool,
}

impl Rendition {
    pub fn title(&self) -> &str {
        &self.key.title
    }

    pub fn resolution(&self) -> Resolution {
        self.key.resolution
    }

    pub fn format(&self) -> MediaFormat {
        self.key.format
    }

    /// Identifier sent to clients in catalog listings.
    pub fn filename(&self) -> String {
        self.key.filename()
    }
}

/// A filename split into its grammar parts without validating vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedName {
    pub title: String,
    pub height: u32,
    pub extension: String,
}

impl ParsedName {
    pub fn parse(filename: &str) -> Option<Self> {
        let captures = FILENAME_PATTERN.captures(filename)?;
        let height = captures["height"].parse().ok()?;
        Some(Self {
            title: captures["title"].to_string(),
            height,
            extension: captures["ext"].to_ascii_lowercase(),
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_round_trip() {
        let key = RenditionKey::new("demo", Resolution::P720, MediaFormat::Mp4);
        assert_eq!(key.filename(), "demo-720p.mp4");
        assert_eq!(RenditionKey::parse_filename("demo-720p.mp4"), Some(key));
    }

    #[test]
    fn test_title_may_contain_dashes() {
        let key = RenditionKey::parse_filename("big-buck-bunny-480p.mkv").unwrap();
        assert_eq!(key.title, "big-buck-bunny");
        assert_eq!(key.resolution, Resolution::P480);
        assert_eq!(key.format, MediaFormat::Mkv);
    }

    #[test]
    fn test_rejects_names_outside_vocabulary() {
        assert_eq!(RenditionKey::parse_filename("demo-2160p.mp4"), None);
        assert_eq!(RenditionKey::parse_filename("demo-720p.mov"), None);
        assert_eq!(RenditionKey::parse_filename("demo.mp4"), None);
        assert_eq!(RenditionKey::parse_filename("-720p.mp4"), None);
    }

    #[test]
    fn test_parsed_name_keeps_unsupported_parts() {
        let parsed = ParsedName::parse("trailer-2160p.MOV").unwrap();
        assert_eq!(parsed.title, "trailer");
        assert_eq!(parsed.height, 2160);
        assert_eq!(parsed.extension, "mov");
    }
}
