pub mod frame;
pub mod router;

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{
    dispatcher::frame::{read_frame, write_frame, FrameError, UnaryEnvelope, MODE_STREAM, MODE_UNARY},
    session::{Session, SessionError, Substream},
};

const LOG_TARGET: &str = "fabric::dispatcher";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("timed out opening a substream")]
    OpenTimeout,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Opens substreams on a [`Session`] and speaks the mode-byte wire protocol: `NodeRpc` for
/// unary calls, `NodeStreamingRpc` for streaming ones.
pub struct Dispatcher {
    substream_open_timeout: Duration,
}

impl Dispatcher {
    pub fn new(substream_open_timeout: Duration) -> Self {
        Self { substream_open_timeout }
    }

    /// Unary `NodeRpc`: opens a substream, writes `MODE_UNARY`, performs one request/response
    /// round trip, and closes the substream before returning regardless of outcome.
    pub async fn node_rpc<Req, Resp>(
        &self,
        session: &dyn Session,
        method: &str,
        argument: &Req,
    ) -> Result<Resp, DispatchError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut substream = tokio::time::timeout(self.substream_open_timeout, session.open())
            .await
            .map_err(|_| DispatchError::OpenTimeout)??;

        tracing::trace!(target: LOG_TARGET, method, "opened substream for unary call");
        let outcome = unary_round_trip(&mut substream, method, argument).await;
        let _ = substream.shutdown().await;
        outcome
    }

    /// Streaming `NodeStreamingRpc`: opens a substream, writes `MODE_STREAM`, sends the
    /// [`frame::StreamingHeader`], then returns the still-open substream to the caller, who owns
    /// it and must close it.
    pub async fn node_streaming_rpc(&self, session: &dyn Session, method: &str) -> Result<Substream, DispatchError> {
        let mut substream = tokio::time::timeout(self.substream_open_timeout, session.open())
            .await
            .map_err(|_| DispatchError::OpenTimeout)??;

        match send_streaming_header(&mut substream, method).await {
            Ok(()) => {
                tracing::debug!(target: LOG_TARGET, method, "streaming substream opened and handed to caller");
                Ok(substream)
            },
            Err(err) => {
                let _ = substream.shutdown().await;
                Err(err)
            },
        }
    }
}

async fn unary_round_trip<Req, Resp>(substream: &mut Substream, method: &str, argument: &Req) -> Result<Resp, DispatchError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    substream.write_all(&[MODE_UNARY]).await.map_err(FrameError::from)?;

    let payload = rmp_serde::to_vec_named(argument)?;
    let envelope = UnaryEnvelope { method: method.to_string(), payload };
    let encoded = rmp_serde::to_vec_named(&envelope)?;
    write_frame(substream, &encoded).await?;

    let response_bytes = read_frame(substream).await?;
    let response: Resp = rmp_serde::from_slice(&response_bytes)?;
    Ok(response)
}

async fn send_streaming_header(substream: &mut Substream, method: &str) -> Result<(), DispatchError> {
    substream.write_all(&[MODE_STREAM]).await.map_err(FrameError::from)?;
    let header = frame::StreamingHeader { method: method.to_string() };
    let encoded = rmp_serde::to_vec_named(&header)?;
    write_frame(substream, &encoded).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::{AtomicBool, Ordering}, Arc};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::session::SessionError;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Echo {
        msg: String,
    }

    /// Hands out exactly one substream, backed by one half of a real `TcpStream` pair, then
    /// reports itself closed. Enough to exercise the dispatcher's wire protocol without a real
    /// multiplexer.
    struct OneShotSession {
        substream: tokio::sync::Mutex<Option<Substream>>,
        closed: AtomicBool,
    }

    impl OneShotSession {
        fn new(substream: Substream) -> Self {
            Self { substream: tokio::sync::Mutex::new(Some(substream)), closed: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl Session for OneShotSession {
        async fn open(&self) -> Result<Substream, SessionError> {
            self.substream.lock().await.take().ok_or(SessionError::Closed)
        }

        async fn accept(&self) -> Result<Substream, SessionError> {
            Err(SessionError::Closed)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn unary_round_trip_writes_mode_byte_and_closes_substream() {
        let (client_half, mut worker_half) = crate::test_util::tcp_pair().await;
        let session = Arc::new(OneShotSession::new(Box::pin(client_half)));

        let worker_task = tokio::spawn(async move {
            let mut mode = [0u8; 1];
            worker_half.read_exact(&mut mode).await.unwrap();
            assert_eq!(mode[0], MODE_UNARY);

            let request_bytes = read_frame(&mut worker_half).await.unwrap();
            let envelope: UnaryEnvelope = rmp_serde::from_slice(&request_bytes).unwrap();
            assert_eq!(envelope.method, "Echo");
            let argument: Echo = rmp_serde::from_slice(&envelope.payload).unwrap();

            let response_bytes = rmp_serde::to_vec_named(&argument).unwrap();
            write_frame(&mut worker_half, &response_bytes).await.unwrap();

            // The dispatcher must close its end; confirm the worker observes EOF.
            let mut trailing = [0u8; 1];
            let n = worker_half.read(&mut trailing).await.unwrap();
            assert_eq!(n, 0);
        });

        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let argument = Echo { msg: "hi".to_string() };
        let response: Echo = dispatcher.node_rpc(session.as_ref(), "Echo", &argument).await.unwrap();
        assert_eq!(response, argument);

        worker_task.await.unwrap();
    }

    #[tokio::test]
    async fn streaming_rpc_sends_header_and_returns_open_substream() {
        let (client_half, mut worker_half) = crate::test_util::tcp_pair().await;
        let session = Arc::new(OneShotSession::new(Box::pin(client_half)));

        let worker_task = tokio::spawn(async move {
            let mut mode = [0u8; 1];
            worker_half.read_exact(&mut mode).await.unwrap();
            assert_eq!(mode[0], MODE_STREAM);

            let header_bytes = read_frame(&mut worker_half).await.unwrap();
            let header: frame::StreamingHeader = rmp_serde::from_slice(&header_bytes).unwrap();
            assert_eq!(header.method, "Tail");

            let mut echoed = [0u8; 3];
            worker_half.read_exact(&mut echoed).await.unwrap();
            worker_half.write_all(&echoed).await.unwrap();
        });

        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let mut substream = dispatcher.node_streaming_rpc(session.as_ref(), "Tail").await.unwrap();
        substream.write_all(b"ABC").await.unwrap();

        let mut buf = [0u8; 3];
        substream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ABC");

        worker_task.await.unwrap();
    }
}
