//! Usage statistics for started streams.
//!
//! Every successful stream start is reported to a [`UsageRecorder`]. The
//! default on-disk recorder appends one CSV row per stream.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

use crate::media::Transport;

/// Header line of the usage CSV file.
pub const CSV_HEADER: &str = "Timestamp,Client_IP,Filename,Protocol,BitrateMbps";

/// One stream start as seen by the statistics writer.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub timestamp: DateTime<Local>,
    pub client_ip: IpAddr,
    pub filename: String,
    pub transport: Transport,
    pub bandwidth_mbps: f64,
}

impl UsageRecord {
    /// CSV row without trailing newline.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.2}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.client_ip,
            self.filename,
            self.transport,
            self.bandwidth_mbps
        )
    }
}

/// Sink for usage records.
///
/// Recording is best effort: failures are logged by the implementation and
/// never affect the session that produced the record.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord);
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageRecorder;

#[async_trait]
impl UsageRecorder for NoopUsageRecorder {
    async fn record(&self, _record: UsageRecord) {}
}

/// Appends usage records to a CSV file.
#[derive(Debug)]
pub struct CsvUsageLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl CsvUsageLog {
    /// Opens (creating if needed) the CSV file at `path`.
    ///
    /// The header row is written only when the file is new.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - Parent directory or file could not be created
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, format!("{CSV_HEADER}\n")).await?;
        }

        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, row: &str) -> Result<(), std::io::Error> {
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{row}\n").as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl UsageRecorder for CsvUsageLog {
    async fn record(&self, record: UsageRecord) {
        if let Err(e) = self.append(&record.to_csv_row()).await {
            tracing::warn!("Failed to write usage stats to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn record(filename: &str) -> UsageRecord {
        UsageRecord {
            timestamp: Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            client_ip: "10.0.0.7".parse().unwrap(),
            filename: filename.to_string(),
            transport: Transport::Udp,
            bandwidth_mbps: 2.0,
        }
    }

    #[test]
    fn test_csv_row_format() {
        assert_eq!(
            record("demo-480p.mp4").to_csv_row(),
            "2026-03-14 09:26:53,10.0.0.7,demo-480p.mp4,UDP,2.00"
        );
    }

    #[tokio::test]
    async fn test_csv_log_writes_header_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("logs").join("server_stats.csv");

        let log = CsvUsageLog::open(&path).await.unwrap();
        log.record(record("a-240p.mp4")).await;
        drop(log);

        let log = CsvUsageLog::open(&path).await.unwrap();
        log.record(record("b-720p.mkv")).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("a-240p.mp4"));
        assert!(lines[2].contains("b-720p.mkv"));
    }
}
