use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

use crate::session::Substream;

const LOG_TARGET: &str = "fabric::bridge";

/// Outcome of a [`bridge`] call: how many bytes moved in each direction before the bridge tore
/// down. Informational only — a copy error mid-stream is expected at session termination and is
/// not surfaced as a call failure, matching the error handling design's treatment of transport
/// errors during teardown.
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeOutcome {
    pub a_to_b_bytes: u64,
    pub b_to_a_bytes: u64,
}

/// Concurrently copies `a -> b` and `b -> a`. The first direction to terminate (EOF or error)
/// wins the race: its sibling copy is abandoned mid-read rather than awaited to its own EOF, and
/// both streams are then shut down, before the call returns.
///
/// Shutting down only the write half a direction fed into is not enough: that half-closes one
/// leg of each stream but leaves the sibling copy's read half exactly as blocked as before, so it
/// would never observe the other side going away. Cancelling the sibling copy outright — by
/// dropping its still-pending future — is what actually unblocks it; the write-half shutdowns
/// that follow are what let each peer observe a clean EOF rather than a reset.
pub async fn bridge(a: Substream, b: Substream) -> BridgeOutcome {
    let (mut a_read, mut a_write) = io::split(a);
    let (mut b_read, mut b_write) = io::split(b);

    let mut a_to_b = Box::pin(io::copy(&mut a_read, &mut b_write));
    let mut b_to_a = Box::pin(io::copy(&mut b_read, &mut a_write));

    let (a_to_b_bytes, b_to_a_bytes) = tokio::select! {
        result = &mut a_to_b => {
            if let Err(err) = &result {
                tracing::debug!(target: LOG_TARGET, %err, "a -> b copy ended");
            }
            drop(b_to_a);
            let _ = a_write.shutdown().await;
            let _ = b_write.shutdown().await;
            (result.unwrap_or(0), 0)
        },
        result = &mut b_to_a => {
            if let Err(err) = &result {
                tracing::debug!(target: LOG_TARGET, %err, "b -> a copy ended");
            }
            drop(a_to_b);
            let _ = a_write.shutdown().await;
            let _ = b_write.shutdown().await;
            (0, result.unwrap_or(0))
        },
    };

    BridgeOutcome { a_to_b_bytes, b_to_a_bytes }
}
