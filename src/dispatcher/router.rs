use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{
    dispatcher::frame::{read_frame, write_frame, FrameError, StreamingHeader, UnaryEnvelope, MODE_STREAM, MODE_UNARY},
    session::{Session, SessionError, Substream},
};

const LOG_TARGET: &str = "fabric::dispatcher::router";

/// Handles one unary call's opaque msgpack payload, returning the opaque msgpack response.
pub type UnaryHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Vec<u8>> + Send + Sync>;

/// Handles one streaming call by taking ownership of the negotiated substream. Responsible for
/// closing it on every exit path.
pub type StreamHandler = Arc<dyn Fn(Substream) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unknown mode byte {0:#x}")]
    UnknownMode(u8),
    #[error("no handler registered for method {0:?}")]
    UnknownMethod(String),
}

/// The wire protocol's counterpart: a worker-side demultiplexer that reads the mode byte off
/// each inbound substream and dispatches to a registered handler by method name.
///
/// Not part of the locator/dispatcher/registry/bridge core itself — it exists so the mode-byte
/// framing those components write can be driven end to end in this crate's own tests, standing
/// in for the real worker process that would otherwise be required.
#[derive(Default)]
pub struct SubstreamRouter {
    unary: RwLock<HashMap<String, UnaryHandler>>,
    streams: RwLock<HashMap<String, StreamHandler>>,
}

impl SubstreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_unary(&self, method: impl Into<String>, handler: UnaryHandler) {
        self.unary.write().insert(method.into(), handler);
    }

    pub fn register_stream(&self, method: impl Into<String>, handler: StreamHandler) {
        self.streams.write().insert(method.into(), handler);
    }

    /// Accepts inbound substreams from `session` until it is closed, dispatching each to a
    /// registered handler on its own task.
    pub async fn serve(self: Arc<Self>, session: Arc<dyn Session>) {
        loop {
            let substream = match session.accept().await {
                Ok(substream) => substream,
                Err(SessionError::Closed) => {
                    tracing::debug!(target: LOG_TARGET, "session closed, router stopping");
                    return;
                },
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, %err, "failed to accept substream");
                    return;
                },
            };
            let router = self.clone();
            tokio::spawn(async move {
                if let Err(err) = router.dispatch_one(substream).await {
                    tracing::warn!(target: LOG_TARGET, %err, "substream dispatch failed");
                }
            });
        }
    }

    async fn dispatch_one(&self, mut substream: Substream) -> Result<(), RouterError> {
        use tokio::io::AsyncReadExt;

        let mut mode = [0u8; 1];
        substream.read_exact(&mut mode).await.map_err(FrameError::from)?;

        match mode[0] {
            MODE_UNARY => {
                let request_bytes = read_frame(&mut substream).await?;
                let envelope: UnaryEnvelope = rmp_serde::from_slice(&request_bytes)?;
                let handler = self
                    .unary
                    .read()
                    .get(&envelope.method)
                    .cloned()
                    .ok_or_else(|| RouterError::UnknownMethod(envelope.method.clone()))?;

                let response = handler(envelope.payload).await;
                write_frame(&mut substream, &response).await?;
                let _ = substream.shutdown().await;
                Ok(())
            },
            MODE_STREAM => {
                let header_bytes = read_frame(&mut substream).await?;
                let header: StreamingHeader = rmp_serde::from_slice(&header_bytes)?;
                let handler = self
                    .streams
                    .read()
                    .get(&header.method)
                    .cloned()
                    .ok_or_else(|| RouterError::UnknownMethod(header.method.clone()))?;

                handler(substream).await;
                Ok(())
            },
            other => Err(RouterError::UnknownMode(other)),
        }
    }
}
