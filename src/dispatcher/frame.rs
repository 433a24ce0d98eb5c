use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A codec-framed unary RPC follows on the substream.
pub const MODE_UNARY: u8 = 0x01;
/// A [`StreamingHeader`] follows, then opaque bytes.
pub const MODE_STREAM: u8 = 0x02;

/// Self-describing streaming handshake header, msgpack-encoded, sent once at the start of a
/// streaming substream before raw byte forwarding begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingHeader {
    #[serde(rename = "Method")]
    pub method: String,
}

/// `{ method, payload }` envelope for the unary RPC round trip; `payload` is itself a
/// msgpack-encoded argument or response, kept opaque here since the wire codec for unary
/// payloads is supplied by the caller, not this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryEnvelope {
    pub method: String,
    pub payload: Vec<u8>,
}

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {1} byte limit")]
    TooLarge(u32, u32),
}

/// Writes a u32-BE length prefix followed by `payload`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len, MAX_FRAME_LEN));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads a u32-BE length prefix followed by exactly that many bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len, MAX_FRAME_LEN));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
