//! TCP wire format for device messages.
//!
//! # Wire format
//!
//! ```text
//! FRAME (both directions):
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: UTF-8 JSON envelope]
//! ```
//!
//! A zero length or one above [`MAX_FRAME_SIZE`] is a protocol error.

use aurora_protocol::constants::MAX_FRAME_SIZE;
use aurora_protocol::envelope::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DeviceError;

/// Writes one framed message and flushes the writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), DeviceError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(DeviceError::Protocol(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            json.len()
        )));
    }

    writer.write_u32(json.len() as u32).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, DeviceError> {
    let len = reader.read_u32().await? as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(DeviceError::Protocol(format!("invalid frame length: {len}")));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf)
        .map_err(|e| DeviceError::Protocol(format!("malformed frame: {e}")))
}
