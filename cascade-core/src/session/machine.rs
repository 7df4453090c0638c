//! Session state machine.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;

use super::request::{self, Capabilities, StreamRequest};
use super::{ConnectionId, SessionContext, SessionError, SessionTimeouts};
use crate::catalog::{RenditionCatalog, RenditionKey};
use crate::config::ReadyHandshake;
use crate::media::{MediaFormat, Resolution, Transport};
use crate::policy::SelectionPolicy;
use crate::stream::{StreamHandle, StreamSupervisor};
use crate::usage::{UsageRecord, UsageRecorder};

/// Sentinel terminating every catalog listing.
pub const END: &str = "END";

/// Advisory written when the client's bandwidth affords no tier.
pub const NO_TIER_ADVISORY: &str = "No supported resolution for your speed.";

/// Prefix of the line reporting a failed stream start.
pub const ERROR_PREFIX: &str = "ERROR";

/// Terms agreed during capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Negotiated {
    pub format: MediaFormat,
    pub bandwidth_mbps: f64,
    pub ceiling: Resolution,
}

/// Explicit protocol state of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Waiting for `<format>;<bandwidth>`.
    AwaitCapabilities,
    /// Catalog listing sent, waiting for the first stream request.
    CatalogSent(Negotiated),
    /// At least one stream request handled; switches and renegotiation allowed.
    Streaming {
        negotiated: Negotiated,
        /// Rendition being streamed, `None` after a failed start
        current: Option<(RenditionKey, Transport)>,
    },
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitCapabilities => "await-capabilities",
            SessionState::CatalogSent(_) => "catalog-sent",
            SessionState::Streaming { .. } => "streaming",
            SessionState::Closed => "closed",
        }
    }

    fn negotiated(&self) -> Option<Negotiated> {
        match self {
            SessionState::CatalogSent(negotiated) => Some(*negotiated),
            SessionState::Streaming { negotiated, .. } => Some(*negotiated),
            _ => None,
        }
    }
}

/// Lines to send back after handling one request, and whether the server
/// hangs up afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reaction {
    pub replies: Vec<String>,
    pub hang_up: bool,
}

impl Reaction {
    fn reply(replies: Vec<String>) -> Self {
        Self {
            replies,
            hang_up: false,
        }
    }

    fn hang_up(replies: Vec<String>) -> Self {
        Self {
            replies,
            hang_up: true,
        }
    }
}

/// Server-side state for one client connection.
///
/// Side effects are limited to the owned [`StreamSupervisor`] and the usage
/// recorder; replies are returned to the caller for writing.
pub struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    catalog: Arc<RenditionCatalog>,
    policy: Arc<SelectionPolicy>,
    usage: Arc<dyn UsageRecorder>,
    ready_handshake: ReadyHandshake,
    supervisor: StreamSupervisor,
    state: SessionState,
}

impl Session {
    pub fn new(id: ConnectionId, peer: SocketAddr, context: &SessionContext) -> Self {
        let target = context.stream.target_for(peer.ip());
        Self {
            id,
            peer,
            catalog: context.catalog.clone(),
            policy: context.policy.clone(),
            usage: context.usage.clone(),
            ready_handshake: context.ready_handshake,
            supervisor: StreamSupervisor::new(context.launcher.clone(), target),
            state: SessionState::AwaitCapabilities,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Handle of the stream currently owned by this session.
    pub fn active_stream(&self) -> Option<StreamHandle> {
        self.supervisor.active_handle()
    }

    /// Read timeout for the next line in the current state.
    pub fn read_timeout(&self, timeouts: &SessionTimeouts) -> Option<std::time::Duration> {
        match self.state {
            SessionState::Streaming { .. } => timeouts.idle,
            _ => Some(timeouts.handshake),
        }
    }

    /// Reacts to one request line.
    ///
    /// On `Err` the session must be closed; it does not close itself so the
    /// caller decides when the stream is released.
    ///
    /// # Errors
    ///
    /// - `SessionError::MalformedRequest` - Line does not parse for the current state
    /// - `SessionError::UnknownRendition` - Requested file is not in the catalog for the negotiated format
    pub async fn handle_line(&mut self, line: &str) -> Result<Reaction, SessionError> {
        match self.state.clone() {
            SessionState::AwaitCapabilities => {
                let capabilities = request::parse_capabilities(line)?;
                Ok(self.negotiate(capabilities).await)
            }
            SessionState::CatalogSent(_) | SessionState::Streaming { .. }
                if request::is_ready(line) =>
            {
                tracing::debug!("Session {} received READY", self.id);
                Ok(Reaction::default())
            }
            SessionState::CatalogSent(negotiated) => {
                let stream_request = request::parse_stream_request(line)?;
                self.switch_stream(negotiated, stream_request).await
            }
            SessionState::Streaming { negotiated, .. } => {
                if request::looks_like_capabilities(line) {
                    let capabilities = request::parse_capabilities(line)?;
                    tracing::info!(
                        "Session {} renegotiating: {} at {} Mbps",
                        self.id,
                        capabilities.format,
                        capabilities.bandwidth_mbps
                    );
                    return Ok(self.negotiate(capabilities).await);
                }
                let stream_request = request::parse_stream_request(line)?;
                self.switch_stream(negotiated, stream_request).await
            }
            SessionState::Closed => {
                tracing::debug!("Session {} ignoring line after close", self.id);
                Ok(Reaction::default())
            }
        }
    }

    /// Computes the tier ceiling and lists matching renditions.
    async fn negotiate(&mut self, capabilities: Capabilities) -> Reaction {
        let Some(ceiling) = self.policy.max_resolution(capabilities.bandwidth_mbps) else {
            tracing::info!(
                "Session {}: {} Mbps affords no resolution",
                self.id,
                capabilities.bandwidth_mbps
            );
            self.close().await;
            return Reaction::hang_up(vec![NO_TIER_ADVISORY.to_string(), END.to_string()]);
        };

        let negotiated = Negotiated {
            format: capabilities.format,
            bandwidth_mbps: capabilities.bandwidth_mbps,
            ceiling,
        };

        let mut replies: Vec<String> = self
            .catalog
            .query(negotiated.format, ceiling)
            .into_iter()
            .map(|rendition| rendition.filename())
            .collect();
        tracing::info!(
            "Session {}: {} at {} Mbps -> up to {}, {} renditions",
            self.id,
            negotiated.format,
            negotiated.bandwidth_mbps,
            ceiling,
            replies.len()
        );
        replies.push(END.to_string());

        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Streaming { current, .. } => SessionState::Streaming {
                negotiated,
                current,
            },
            _ => SessionState::CatalogSent(negotiated),
        };

        Reaction::reply(replies)
    }

    /// Validates a stream request and replaces the active stream.
    async fn switch_stream(
        &mut self,
        negotiated: Negotiated,
        stream_request: StreamRequest,
    ) -> Result<Reaction, SessionError> {
        let rendition = self
            .catalog
            .lookup(&stream_request.filename)
            .filter(|rendition| rendition.format() == negotiated.format)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRendition {
                filename: stream_request.filename.clone(),
                format: negotiated.format,
            })?;

        let transport = stream_request
            .transport
            .unwrap_or_else(|| self.policy.default_transport(rendition.resolution()));

        tracing::info!(
            "Session {}: streaming {} to {} via {}",
            self.id,
            rendition.filename(),
            self.peer,
            transport
        );

        match self.supervisor.start(&rendition, transport).await {
            Ok(_handle) => {
                self.usage
                    .record(UsageRecord {
                        timestamp: Local::now(),
                        client_ip: self.peer.ip(),
                        filename: rendition.filename(),
                        transport,
                        bandwidth_mbps: negotiated.bandwidth_mbps,
                    })
                    .await;

                self.state = SessionState::Streaming {
                    negotiated,
                    current: Some((rendition.key.clone(), transport)),
                };

                let replies = match self.ready_handshake {
                    ReadyHandshake::Announce => vec![request::READY.to_string()],
                    ReadyHandshake::Disabled => Vec::new(),
                };
                Ok(Reaction::reply(replies))
            }
            Err(e) => {
                tracing::error!("Session {}: {}", self.id, e);
                self.state = SessionState::Streaming {
                    negotiated,
                    current: None,
                };
                let reason = e.to_string().replace(['\r', '\n'], " ");
                Ok(Reaction::reply(vec![format!("{ERROR_PREFIX} {reason}")]))
            }
        }
    }

    /// Releases the stream and enters `Closed`. Idempotent.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.supervisor.shutdown().await;
        self.state = SessionState::Closed;
        tracing::debug!("Session {} closed", self.id);
    }
}
