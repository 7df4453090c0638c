//! Media vocabulary shared by the catalog, the selection policy and the wire protocol.
//!
//! Every value here has a canonical textual form used both in filenames
//! (`demo-720p.mp4`) and on the wire (`mp4;2.5`, `demo-720p.mp4;RTP`).

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Errors produced when parsing media vocabulary from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaParseError {
    #[error("unsupported resolution: {value}")]
    UnsupportedResolution { value: String },

    #[error("unsupported container format: {value}")]
    UnsupportedFormat { value: String },

    #[error("unsupported transport protocol: {value}")]
    UnsupportedTransport { value: String },
}

/// Discrete resolution tier, ordered from lowest to highest quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Resolution {
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Resolution {
    /// All tiers in ascending order.
    pub const ALL: [Resolution; 5] = [
        Resolution::P240,
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
    ];

    /// Vertical line count of this tier.
    pub fn height(self) -> u32 {
        match self {
            Resolution::P240 => 240,
            Resolution::P360 => 360,
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
        }
    }

    /// Maps an exact line count to its tier.
    pub fn from_height(height: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.height() == height)
    }

    /// Highest tier whose line count does not exceed `height`.
    ///
    /// Used to derive a native tier for sources encoded at a non-tier
    /// resolution such as 2160p or 300p.
    pub fn highest_at_or_below(height: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|tier| tier.height() <= height)
    }

    /// Index of this tier within [`Resolution::ALL`].
    pub fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

impl FromStr for Resolution {
    type Err = MediaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('p')
            .or_else(|| trimmed.strip_suffix('P'))
            .unwrap_or(trimmed);

        digits
            .parse::<u32>()
            .ok()
            .and_then(Resolution::from_height)
            .ok_or_else(|| MediaParseError::UnsupportedResolution {
                value: s.to_string(),
            })
    }
}

/// Container format a rendition is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    Avi,
    Mkv,
}

impl MediaFormat {
    /// All supported formats in catalog order.
    pub const ALL: [MediaFormat; 3] = [MediaFormat::Mp4, MediaFormat::Avi, MediaFormat::Mkv];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Avi => "avi",
            MediaFormat::Mkv => "mkv",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for MediaFormat {
    type Err = MediaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(MediaFormat::Mp4),
            "avi" => Ok(MediaFormat::Avi),
            "mkv" => Ok(MediaFormat::Mkv),
            _ => Err(MediaParseError::UnsupportedFormat {
                value: s.to_string(),
            }),
        }
    }
}

/// Transport protocol used by the external streaming process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    Tcp,
    Udp,
    Rtp,
}

impl Transport {
    /// Wire name, always upper case.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
            Transport::Rtp => "RTP",
        }
    }

    /// URL scheme understood by the streaming tool.
    pub fn scheme(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Rtp => "rtp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = MediaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Transport::Tcp),
            "UDP" => Ok(Transport::Udp),
            "RTP" => Ok(Transport::Rtp),
            _ => Err(MediaParseError::UnsupportedTransport {
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_ordering_follows_height() {
        let mut shuffled = vec![
            Resolution::P720,
            Resolution::P240,
            Resolution::P1080,
            Resolution::P480,
            Resolution::P360,
        ];
        shuffled.sort();
        assert_eq!(shuffled, Resolution::ALL.to_vec());
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("720p".parse::<Resolution>(), Ok(Resolution::P720));
        assert_eq!("1080".parse::<Resolution>(), Ok(Resolution::P1080));
        assert!("144p".parse::<Resolution>().is_err());
        assert!("hd".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_highest_at_or_below() {
        assert_eq!(Resolution::highest_at_or_below(2160), Some(Resolution::P1080));
        assert_eq!(Resolution::highest_at_or_below(300), Some(Resolution::P240));
        assert_eq!(Resolution::highest_at_or_below(480), Some(Resolution::P480));
        assert_eq!(Resolution::highest_at_or_below(144), None);
    }

    #[test]
    fn test_format_and_transport_are_case_insensitive() {
        assert_eq!(" MP4 ".parse::<MediaFormat>(), Ok(MediaFormat::Mp4));
        assert_eq!("udp".parse::<Transport>(), Ok(Transport::Udp));
        assert!("mov".parse::<MediaFormat>().is_err());
        assert!("HTTP".parse::<Transport>().is_err());
    }

    #[test]
    fn test_display_round_trips_wire_names() {
        assert_eq!(Resolution::P360.to_string(), "360p");
        assert_eq!(MediaFormat::Mkv.to_string(), "mkv");
        assert_eq!(Transport::Rtp.to_string(), "RTP");
    }
}
