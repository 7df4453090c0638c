//! Connection dispatcher.
//!
//! A single accept loop that spawns one task per connection. Each task owns
//! its session, so a failing or panicking session never reaches the loop or
//! any other session.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::session::{ConnectionId, Session, SessionContext, run_session};

/// First pause after a failed accept.
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);
/// Longest pause between accept attempts while accepts keep failing.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Accepts client connections and runs one session per connection.
pub struct ConnectionDispatcher {
    listener: TcpListener,
    context: SessionContext,
    next_id: u64,
}

impl ConnectionDispatcher {
    /// Binds the listening endpoint.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - Address is unavailable or already in use
    pub async fn bind(addr: SocketAddr, context: SessionContext) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Streaming server listening on {}", listener.local_addr()?);
        Ok(Self::from_listener(listener, context))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener, context: SessionContext) -> Self {
        Self {
            listener,
            context,
            next_id: 1,
        }
    }

    /// Address actually bound, useful when binding port 0.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - Socket address could not be queried
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Accepts connections until `shutdown` resolves, then aborts every
    /// in-flight session. Aborted sessions drop their supervisors, which
    /// kills their stream processes.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        let mut backoff = AcceptBackoff::new();
        tokio::pin!(shutdown);

        loop {
            let pause = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Dispatcher shutting down, aborting {} sessions", sessions.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff.reset();
                        let id = ConnectionId(self.next_id);
                        self.next_id += 1;
                        tracing::info!("Connection {} accepted from {}", id, peer);
                        let span = tracing::info_span!("session", id = %id, peer = %peer);
                        sessions.spawn(
                            serve_connection(id, stream, peer, self.context.clone()).instrument(span),
                        );
                        None
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::error!("Failed to accept connection, retrying in {:?}: {}", delay, e);
                        Some(delay)
                    }
                },
            };

            if let Some(delay) = pause {
                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!("Dispatcher shutting down, aborting {} sessions", sessions.len());
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            while let Some(finished) = sessions.try_join_next() {
                if let Err(e) = finished
                    && e.is_panic()
                {
                    tracing::error!("Session task panicked: {}", e);
                }
            }
        }

        sessions.shutdown().await;
    }
}

async fn serve_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    context: SessionContext,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Connection {}: failed to set TCP_NODELAY: {}", id, e);
    }

    let session = Session::new(id, peer, &context);
    let (reader, writer) = stream.into_split();
    run_session(session, reader, writer, context.timeouts).await;
}

/// Pause between failed accepts, doubling up to [`ACCEPT_BACKOFF_MAX`] and
/// reset by the next accepted connection.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: ACCEPT_BACKOFF_START,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = ACCEPT_BACKOFF_START;
    }
}
