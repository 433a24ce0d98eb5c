use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{clock::Timestamp, peer::PeerServer, worker_id::WorkerId};

const LOG_TARGET: &str = "fabric::connpool";

/// `Status.HasNodeConn` request: `{ region, worker_id }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasNodeConnRequest {
    pub region: String,
    pub worker_id: String,
}

/// `Status.HasNodeConn` response: `{ connected, established_at }`. `established_at` is
/// unspecified when `connected` is `false`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HasNodeConnResponse {
    pub connected: bool,
    pub established_at: Timestamp,
}

#[derive(Debug, Error)]
pub enum ConnPoolError {
    #[error("dial timed out")]
    DialTimeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] rmp_serde::encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("peer closed the connection before responding")]
    Hangup,
}

/// Transport factory for unary RPCs against a peer *server* (not a worker).
///
/// Given or reused, dials a TCP connection and performs one round-trip. This crate specifies
/// only the one RPC the [`crate::locator::Locator`] needs (`has_node_conn`); a full connection
/// pool with reuse and backoff policy is an external collaborator's concern.
#[async_trait]
pub trait ConnPool: Send + Sync {
    async fn has_node_conn(
        &self,
        peer: &PeerServer,
        worker_id: &WorkerId,
        region: &str,
    ) -> Result<HasNodeConnResponse, ConnPoolError>;
}

/// Direct-dial [`ConnPool`]: opens a fresh TCP connection per call, frames messages with a
/// length-delimited codec, and encodes the request/response as msgpack.
pub struct TcpConnPool {
    dial_timeout: Duration,
}

impl TcpConnPool {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl ConnPool for TcpConnPool {
    async fn has_node_conn(
        &self,
        peer: &PeerServer,
        worker_id: &WorkerId,
        region: &str,
    ) -> Result<HasNodeConnResponse, ConnPoolError> {
        let socket = tokio::time::timeout(self.dial_timeout, TcpStream::connect(peer.addr))
            .await
            .map_err(|_| ConnPoolError::DialTimeout)??;
        let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

        let request = HasNodeConnRequest { region: region.to_string(), worker_id: worker_id.as_str().to_string() };
        let encoded = rmp_serde::to_vec_named(&request)?;
        tracing::trace!(target: LOG_TARGET, peer = %peer.addr, worker_id = %worker_id, "dialing Status.HasNodeConn");
        framed.send(encoded.into()).await?;

        let frame = framed.next().await.ok_or(ConnPoolError::Hangup)??;
        let response: HasNodeConnResponse = rmp_serde::from_slice(&frame)?;
        Ok(response)
    }
}
