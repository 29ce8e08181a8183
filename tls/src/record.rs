//! Minimal record framing carried *inside* the TLS byte stream, so that
//! the heartbeat challenge/response traffic (spec.md §4.1) and ordinary
//! application bytes (`send`/`data`) can share one TLS session without
//! being confused for one another.
//!
//! Record shape: `[tag: u8][len: u32 BE][payload: len bytes]`.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Record tag for application-layer bytes passed to `TlsChannel::send`.
pub const TAG_DATA: u8 = 0;
/// Record tag for a heartbeat challenge/response payload.
pub const TAG_HEARTBEAT: u8 = 1;

const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Write one tagged record to `writer`.
pub async fn write_record<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    payload: &[u8],
) -> io::Result<()> {
    let mut header = [0u8; 5];
    header[0] = tag;
    header[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one tagged record from `reader`, or `Ok(None)` on clean EOF
/// before any header bytes arrive.
pub async fn read_record<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 5];
    match reader.read_exact(&mut header).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let tag = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((tag, payload)))
}
