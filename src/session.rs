use std::{
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::Poll,
};

use async_trait::async_trait;
use futures::future::poll_fn;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot, Mutex as AsyncMutex},
};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

const LOG_TARGET: &str = "fabric::session";

/// A reliable, ordered byte stream opened over a [`Session`].
///
/// Boxed and type-erased so callers don't need to know whether the underlying multiplexer is
/// Yamux or something else; every concrete transport need only produce something that reads and
/// writes bytes.
pub type Substream = Pin<Box<dyn AsyncReadWrite>>;

/// Blanket marker for anything that can stand in as a [`Substream`].
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("multiplex error: {0}")]
    Multiplex(#[from] yamux::ConnectionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A multiplexed connection abstraction owned by the server that accepted a worker's TCP
/// connection. Opens independent substreams; each substream is a reliable ordered byte stream.
///
/// `open` is used by the [`crate::dispatcher::Dispatcher`] to push an RPC out to the worker;
/// `accept` is used by a [`crate::dispatcher::router::SubstreamRouter`] to receive substreams the
/// worker opened toward this server. Closed sessions must cause both to fail deterministically.
#[async_trait]
pub trait Session: fmt::Debug + Send + Sync {
    /// Opens a new substream toward the peer on the other end of this session.
    async fn open(&self) -> Result<Substream, SessionError>;

    /// Accepts the next substream the peer opened toward us, in FIFO order.
    async fn accept(&self) -> Result<Substream, SessionError>;

    /// Closes the session. Idempotent; subsequent `open`/`accept` calls fail with
    /// [`SessionError::Closed`].
    fn close(&self);

    fn is_connected(&self) -> bool;
}

type YamuxIo = Compat<tokio::net::TcpStream>;

/// Reply channel for one pending `open_stream` request served by [`drive_connection`].
type OpenReply = oneshot::Sender<Result<yamux::Stream, yamux::ConnectionError>>;

/// [`Session`] backed by a real Yamux-multiplexed TCP connection.
///
/// Yamux 0.13 dropped the actor-style `Control`/`ControlledConnection` split: a `Connection` is
/// driven entirely through `poll_next_inbound`/`poll_new_outbound`/`poll_close`, and — since it
/// is neither `Clone` nor `Sync` — only one task may ever touch it. [`YamuxSession::spawn`] gives
/// that task exclusive ownership of the `Connection` and exposes a cheap-to-clone handle that
/// talks to it over channels, the same "background driver task + shared handle" shape this
/// crate's predecessor used when `Control` still existed.
pub struct YamuxSession {
    open_tx: mpsc::Sender<OpenReply>,
    close_tx: mpsc::Sender<()>,
    inbound: AsyncMutex<mpsc::Receiver<yamux::Stream>>,
    connected: Arc<AtomicBool>,
}

impl fmt::Debug for YamuxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YamuxSession")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl YamuxSession {
    /// Wraps an accepted worker TCP connection in a server-mode Yamux session and spawns the
    /// background task that drives it.
    pub fn spawn(socket: tokio::net::TcpStream) -> Arc<Self> {
        Self::spawn_with_mode(socket, yamux::Mode::Server)
    }

    /// As [`Self::spawn`], but lets the caller pick the Yamux mode explicitly.
    ///
    /// Production servers only ever wrap an *accepted* connection, hence only `spawn` is public
    /// API surface; the worker side of a pairing (used in this crate's own test harness to
    /// exercise both ends of a session) needs `Mode::Client`.
    pub fn spawn_with_mode(socket: tokio::net::TcpStream, mode: yamux::Mode) -> Arc<Self> {
        let io = socket.compat();
        let mux_config = yamux::Config::default();
        let connection = yamux::Connection::new(io, mux_config, mode);

        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let (open_tx, open_rx) = mpsc::channel(32);
        let (close_tx, close_rx) = mpsc::channel(1);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(drive_connection(connection, inbound_tx, open_rx, close_rx, connected.clone()));

        Arc::new(Self { open_tx, close_tx, inbound: AsyncMutex::new(inbound_rx), connected })
    }
}

/// What woke the driver loop up: one of the three event sources it multiplexes over. Kept as a
/// plain enum so only one of `open_rx`/`connection` is ever touched per iteration, rather than
/// holding two independent futures that both need `&mut connection` alive at once.
enum DriverEvent {
    OpenRequest(OpenReply),
    Inbound(Option<Result<yamux::Stream, yamux::ConnectionError>>),
    Close,
}

/// Owns the Yamux `Connection` for the lifetime of the session: it is the only task that ever
/// calls into it, servicing inbound-substream delivery and outbound `open` requests from the same
/// loop because both ultimately drive the same underlying socket I/O.
async fn drive_connection(
    mut connection: yamux::Connection<YamuxIo>,
    inbound_tx: mpsc::Sender<yamux::Stream>,
    mut open_rx: mpsc::Receiver<OpenReply>,
    mut close_rx: mpsc::Receiver<()>,
    connected: Arc<AtomicBool>,
) {
    loop {
        let event = poll_fn(|cx| {
            if close_rx.poll_recv(cx).is_ready() {
                return Poll::Ready(DriverEvent::Close);
            }
            if let Poll::Ready(request) = open_rx.poll_recv(cx) {
                return Poll::Ready(match request {
                    Some(reply) => DriverEvent::OpenRequest(reply),
                    None => DriverEvent::Close,
                });
            }
            connection.poll_next_inbound(cx).map(DriverEvent::Inbound)
        })
        .await;

        match event {
            DriverEvent::Close => {
                let _ = poll_fn(|cx| connection.poll_close(cx)).await;
                tracing::debug!(target: LOG_TARGET, "session close requested, driver stopping");
                break;
            },
            DriverEvent::OpenRequest(reply) => {
                let outcome = poll_fn(|cx| connection.poll_new_outbound(cx)).await;
                let _ = reply.send(outcome);
            },
            DriverEvent::Inbound(Some(Ok(stream))) => {
                if inbound_tx.send(stream).await.is_err() {
                    tracing::debug!(target: LOG_TARGET, "inbound substream receiver dropped, stopping driver");
                    break;
                }
            },
            DriverEvent::Inbound(Some(Err(err))) => {
                tracing::warn!(target: LOG_TARGET, %err, "yamux connection error, closing session");
                break;
            },
            DriverEvent::Inbound(None) => {
                tracing::debug!(target: LOG_TARGET, "yamux connection closed");
                break;
            },
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl Session for YamuxSession {
    async fn open(&self) -> Result<Substream, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.open_tx.send(reply_tx).await.map_err(|_| SessionError::Closed)?;
        let stream = reply_rx.await.map_err(|_| SessionError::Closed)?;
        Ok(Box::pin(stream?.compat()))
    }

    async fn accept(&self) -> Result<Substream, SessionError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(stream) => Ok(Box::pin(stream.compat())),
            None => Err(SessionError::Closed),
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.close_tx.try_send(());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
