//! Framing for reports sent between instances.
//!
//! ```text
//! +-----------------+----------------------+------------------+
//! | len: u32 (BE)   | HMAC-SHA256 (32 B)   | JSON payload     |
//! +-----------------+----------------------+------------------+
//! ```
//!
//! `len` counts the payload only.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::store::RemoteSnapshot;
use crate::crypto::{TAG_LEN, Tag, sign_payload, verify_payload};
use crate::error::FrameError;

pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Everything one instance knows about its own monitors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteReport {
    pub sender: String,
    /// Start time of the sending process, in unix seconds
    pub epoch: u64,
    /// Increases with every report within one epoch
    pub sequence: u64,
    pub monitors: RemoteSnapshot,
}

pub fn encode_frame(report: &RemoteReport, key: &[u8]) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(report)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let tag = sign_payload(key, &payload);

    let mut frame = Vec::with_capacity(4 + TAG_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&tag);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    report: &RemoteReport,
    key: &[u8],
) -> Result<(), FrameError> {
    let frame = encode_frame(report, key)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` is a clean end of stream before a new frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    key: &[u8],
) -> Result<Option<RemoteReport>, FrameError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }

    let mut tag: Tag = [0u8; TAG_LEN];
    reader.read_exact(&mut tag).await?;

    // Grows with what actually arrives, not with what the header claims
    let mut payload = Vec::new();
    reader.take(len as u64).read_to_end(&mut payload).await?;
    if payload.len() < len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }

    decode_payload(&tag, &payload, key).map(Some)
}

/// Authenticate and parse a payload. The tag is checked before any parsing.
pub fn decode_payload(tag: &[u8], payload: &[u8], key: &[u8]) -> Result<RemoteReport, FrameError> {
    if !verify_payload(key, payload, tag) {
        return Err(FrameError::BadTag);
    }
    Ok(serde_json::from_slice(payload)?)
}
