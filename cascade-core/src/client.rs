//! Client side of the session protocol.
//!
//! Used by the `cascade catalog` and `cascade play` commands and by the
//! end-to-end tests.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::catalog::RenditionKey;
use crate::media::{MediaFormat, Transport};
use crate::session::machine::{END, ERROR_PREFIX};
use crate::session::request::READY;

/// Errors raised by [`CatalogClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server closed the connection")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Server answer to a capability line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogListing {
    /// Offered filenames in server order
    pub files: Vec<String>,
    /// Set when the server could not offer anything
    pub advisory: Option<String>,
}

impl CatalogListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Offered files that follow the rendition naming scheme.
    pub fn renditions(&self) -> Vec<RenditionKey> {
        self.files
            .iter()
            .filter_map(|name| RenditionKey::parse_filename(name))
            .collect()
    }
}

/// Unsolicited line received after a stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    Ready,
    Error(String),
    Other(String),
}

impl ServerReply {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.eq_ignore_ascii_case(READY) {
            return ServerReply::Ready;
        }
        match line.strip_prefix(ERROR_PREFIX) {
            Some(reason) => ServerReply::Error(reason.trim().to_string()),
            None => ServerReply::Other(line.to_string()),
        }
    }
}

/// One client connection to a streaming server.
pub struct CatalogClient {
    peer: SocketAddr,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl CatalogClient {
    /// Connects to a streaming server.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connect` - Server unreachable or refused the connection
    pub async fn connect(addr: SocketAddr) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();

        tracing::debug!("Connected to streaming server at {}", addr);
        Ok(Self {
            peer: addr,
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends capabilities and reads the listing up to `END`.
    ///
    /// Also used mid-stream to renegotiate.
    ///
    /// # Errors
    ///
    /// - `ClientError::ConnectionClosed` - Server hung up before `END`
    /// - `ClientError::Io` - Socket failure
    pub async fn negotiate(
        &mut self,
        format: MediaFormat,
        bandwidth_mbps: f64,
    ) -> ClientResult<CatalogListing> {
        self.send_line(&format!("{format};{bandwidth_mbps}")).await?;

        let mut listing = CatalogListing::default();
        loop {
            let line = self.next_line().await?.ok_or(ClientError::ConnectionClosed)?;
            let line = line.trim();
            if line == END {
                break;
            }
            if RenditionKey::parse_filename(line).is_some() {
                listing.files.push(line.to_string());
            } else {
                listing.advisory = Some(line.to_string());
            }
        }

        tracing::debug!(
            "Negotiated {};{} with {}: {} files",
            format,
            bandwidth_mbps,
            self.peer,
            listing.files.len()
        );
        Ok(listing)
    }

    /// Asks the server to stream `filename`; `None` lets the server pick
    /// the transport.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` - Socket failure
    pub async fn request(&mut self, filename: &str, transport: Option<Transport>) -> ClientResult<()> {
        let protocol = transport.map(Transport::as_str).unwrap_or_default();
        self.send_line(&format!("{filename};{protocol}")).await
    }

    /// Sends the `READY` synchronization token.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` - Socket failure
    pub async fn send_ready(&mut self) -> ClientResult<()> {
        self.send_line(READY).await
    }

    /// Waits up to `wait` for a server line.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// - `ClientError::ConnectionClosed` - Server hung up
    /// - `ClientError::Io` - Socket failure
    pub async fn read_reply(&mut self, wait: Duration) -> ClientResult<Option<ServerReply>> {
        match tokio::time::timeout(wait, self.next_line()).await {
            Err(_) => Ok(None),
            Ok(line) => {
                let line = line?.ok_or(ClientError::ConnectionClosed)?;
                Ok(Some(ServerReply::parse(&line)))
            }
        }
    }

    /// Waits until the server closes the connection, discarding any lines.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` - Socket failure
    pub async fn wait_closed(&mut self) -> ClientResult<()> {
        while let Some(line) = self.next_line().await? {
            tracing::trace!("Discarding {:?} from {}", line, self.peer);
        }
        Ok(())
    }

    /// Closes the write side, which ends the session on the server.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` - Socket failure
    pub async fn close(mut self) -> ClientResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send_line(&mut self, line: &str) -> ClientResult<()> {
        tracing::trace!("-> {} {:?}", self.peer, line);
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> ClientResult<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}
