use std::{fmt, sync::Arc, time::Duration};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    clock::Timestamp,
    connpool::{ConnPool, ConnPoolError},
    peer::{PeerDirectory, PeerServer},
    worker_id::WorkerId,
};

const LOG_TARGET: &str = "fabric::locator";

/// Per-peer failures collected during a fan-out that ultimately found no winner.
///
/// A thin `Display` wrapper rather than a bare `Vec` so [`LocatorError`]'s own `#[error]`
/// message can defer to it, joining each peer's failure onto its own line the way a
/// multi-error accumulator does elsewhere in this lineage.
#[derive(Debug)]
pub struct AggregatedErrors(pub Vec<(PeerServer, ConnPoolError)>);

impl fmt::Display for AggregatedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} peer(s) failed to answer Status.HasNodeConn:", self.0.len())?;
        for (peer, err) in &self.0 {
            writeln!(f, "  - {}: {}", peer.id, err)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LocatorError {
    /// Every peer answered successfully but none holds a session to the requested worker.
    #[error("no peer holds a connection to this worker")]
    NoNodeConn,

    /// At least one peer failed and no peer reported `connected=true`.
    #[error("{0}")]
    Aggregate(AggregatedErrors),
}

/// Resolves which peer server currently holds a live session to a given worker.
///
/// Fans a `Status.HasNodeConn` RPC out to every peer except self, in parallel, and returns the
/// peer with the strictly most recent `established_at` among those that reported
/// `connected=true`. Per-peer errors are collected, not fatal: any successful "connected" answer
/// trumps every error from other peers.
pub struct Locator {
    peer_directory: Arc<dyn PeerDirectory>,
    conn_pool: Arc<dyn ConnPool>,
    region: String,
    fanout_timeout: Duration,
}

struct Candidate {
    peer: PeerServer,
    established_at: Timestamp,
}

impl Locator {
    /// `fanout_timeout` bounds the whole fan-out (typically `FabricConfig::fanout_timeout`),
    /// regardless of how many peers are queried — it is not a per-peer timeout, which is instead
    /// the `ConnPool`'s own concern (e.g. `TcpConnPool`'s dial timeout).
    pub fn new(
        peer_directory: Arc<dyn PeerDirectory>,
        conn_pool: Arc<dyn ConnPool>,
        region: String,
        fanout_timeout: Duration,
    ) -> Self {
        Self { peer_directory, conn_pool, region, fanout_timeout }
    }

    pub async fn server_with_worker_conn(&self, worker_id: &WorkerId) -> Result<PeerServer, LocatorError> {
        let peers: Vec<PeerServer> = self.peer_directory.snapshot().into_iter().filter(|p| !p.is_self).collect();

        if peers.is_empty() {
            tracing::debug!(target: LOG_TARGET, worker_id = %worker_id, "no peers to query, returning NoNodeConn");
            return Err(LocatorError::NoNodeConn);
        }

        let best: Mutex<Option<Candidate>> = Mutex::new(None);
        let errors: Mutex<Vec<(PeerServer, ConnPoolError)>> = Mutex::new(Vec::new());

        let mut fanout: FuturesUnordered<_> = peers
            .into_iter()
            .map(|peer| {
                let conn_pool = self.conn_pool.clone();
                let region = self.region.clone();
                async move {
                    let result = conn_pool.has_node_conn(&peer, worker_id, &region).await;
                    (peer, result)
                }
            })
            .collect();

        let drain = async {
            while let Some((peer, result)) = fanout.next().await {
                match result {
                    Ok(response) if response.connected => {
                        let mut best_guard = best.lock();
                        let is_better = match &*best_guard {
                            Some(current) => response.established_at > current.established_at,
                            None => true,
                        };
                        if is_better {
                            tracing::trace!(
                                target: LOG_TARGET,
                                peer = %peer.id,
                                established_at = response.established_at,
                                "new best candidate"
                            );
                            *best_guard = Some(Candidate { peer, established_at: response.established_at });
                        }
                    },
                    Ok(_not_connected) => {},
                    Err(err) => {
                        tracing::warn!(target: LOG_TARGET, peer = %peer.id, %err, "Status.HasNodeConn failed");
                        errors.lock().push((peer, err));
                    },
                }
            }
        };

        // Bounds the whole fan-out to `fanout_timeout` regardless of peer count. A peer that
        // hasn't answered by then is treated the same as one that was never queried: it
        // contributes neither a candidate nor an error, so a single unresponsive peer degrades
        // the result (fewer candidates/errors considered) rather than blocking the call.
        if tokio::time::timeout(self.fanout_timeout, drain).await.is_err() {
            tracing::warn!(
                target: LOG_TARGET,
                worker_id = %worker_id,
                "locator fan-out exceeded its configured timeout, proceeding with partial results"
            );
        }

        if let Some(candidate) = best.into_inner() {
            // A successful route supersedes partial failures; accumulated errors are discarded.
            return Ok(candidate.peer);
        }

        let errors = errors.into_inner();
        if errors.is_empty() {
            Err(LocatorError::NoNodeConn)
        } else {
            Err(LocatorError::Aggregate(AggregatedErrors(errors)))
        }
    }
}
