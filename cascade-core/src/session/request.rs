//! Parsing of client request lines.
//!
//! Grammar (one statement per line, `;`-separated):
//!
//! ```text
//! capabilities := <format> ";" <bandwidth-mbps>
//! stream       := <filename> ";" [ "TCP" | "UDP" | "RTP" ]
//! ready        := "READY"
//! ```

use super::SessionError;
use crate::media::{MediaFormat, Transport};

/// Literal used for the optional synchronization handshake.
pub const READY: &str = "READY";

/// Client capabilities sent as the first line of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub format: MediaFormat,
    pub bandwidth_mbps: f64,
}

/// Request to stream (or switch to) a rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub filename: String,
    /// `None` when the client asked for automatic selection
    pub transport: Option<Transport>,
}

/// Splits `line` into exactly two `;`-separated fields.
fn split_fields(line: &str) -> Result<(&str, &str), SessionError> {
    let mut fields = line.trim().split(';');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(first), Some(second), None) => Ok((first.trim(), second.trim())),
        (_, None, _) => Err(SessionError::malformed(line, "missing ';' separator")),
        _ => Err(SessionError::malformed(line, "expected exactly two fields")),
    }
}

/// Parses a `<format>;<bandwidth>` line.
///
/// # Errors
///
/// - `SessionError::MalformedRequest` - Wrong field count, unsupported format, or a bandwidth that is not a finite non-negative number
pub fn parse_capabilities(line: &str) -> Result<Capabilities, SessionError> {
    let (format, bandwidth) = split_fields(line)?;

    let format = format
        .parse::<MediaFormat>()
        .map_err(|e| SessionError::malformed(line, e.to_string()))?;

    let bandwidth_mbps = bandwidth
        .parse::<f64>()
        .map_err(|_| SessionError::malformed(line, format!("bandwidth '{bandwidth}' is not a number")))?;
    if !bandwidth_mbps.is_finite() || bandwidth_mbps < 0.0 {
        return Err(SessionError::malformed(
            line,
            format!("bandwidth '{bandwidth}' is out of range"),
        ));
    }

    Ok(Capabilities {
        format,
        bandwidth_mbps,
    })
}

/// Parses a `<filename>;<protocol>` line; an empty protocol means automatic.
///
/// # Errors
///
/// - `SessionError::MalformedRequest` - Wrong field count, empty filename or unknown protocol
pub fn parse_stream_request(line: &str) -> Result<StreamRequest, SessionError> {
    let (filename, protocol) = split_fields(line)?;

    if filename.is_empty() {
        return Err(SessionError::malformed(line, "empty filename"));
    }

    let transport = if protocol.is_empty() {
        None
    } else {
        Some(
            protocol
                .parse::<Transport>()
                .map_err(|e| SessionError::malformed(line, e.to_string()))?,
        )
    };

    Ok(StreamRequest {
        filename: filename.to_string(),
        transport,
    })
}

/// Whether `line` is the `READY` synchronization token.
pub fn is_ready(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(READY)
}

/// Whether a line received mid-stream is a capability renegotiation rather
/// than a switch request.
///
/// Filenames always carry an extension, so a bare format name followed by a
/// number can only be a capability line.
pub fn looks_like_capabilities(line: &str) -> bool {
    split_fields(line)
        .map(|(format, bandwidth)| {
            format.parse::<MediaFormat>().is_ok() && bandwidth.parse::<f64>().is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capabilities() {
        let caps = parse_capabilities("MP4; 10.0\r").unwrap();
        assert_eq!(caps.format, MediaFormat::Mp4);
        assert_eq!(caps.bandwidth_mbps, 10.0);
    }

    #[test]
    fn test_capabilities_without_separator_is_malformed() {
        assert!(matches!(
            parse_capabilities("mp4"),
            Err(SessionError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_capabilities_rejects_bad_fields() {
        for line in ["mp4;fast", "mov;5.0", "mp4;5.0;extra", "mp4;NaN", "mp4;-1", ";5.0"] {
            assert!(
                matches!(
                    parse_capabilities(line),
                    Err(SessionError::MalformedRequest { .. })
                ),
                "{line} should be malformed"
            );
        }
    }

    #[test]
    fn test_parse_stream_request() {
        assert_eq!(
            parse_stream_request("demo-720p.mp4;").unwrap(),
            StreamRequest {
                filename: "demo-720p.mp4".to_string(),
                transport: None,
            }
        );
        assert_eq!(
            parse_stream_request("demo-480p.mp4;udp").unwrap().transport,
            Some(Transport::Udp)
        );
    }

    #[test]
    fn test_stream_request_rejects_bad_fields() {
        for line in ["demo-720p.mp4", ";RTP", "demo-720p.mp4;HTTP", "a;b;c"] {
            assert!(
                matches!(
                    parse_stream_request(line),
                    Err(SessionError::MalformedRequest { .. })
                ),
                "{line} should be malformed"
            );
        }
    }

    #[test]
    fn test_line_classification() {
        assert!(is_ready(" ready "));
        assert!(!is_ready("READY;"));
        assert!(looks_like_capabilities("mkv;2.5"));
        assert!(!looks_like_capabilities("demo-720p.mkv;RTP"));
        assert!(!looks_like_capabilities("demo-720p.mkv;"));
    }
}
