use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Read exactly `len` bytes within `wait`.
///
/// `Ok(None)` when the deadline passes or the stream ends first; bytes read
/// before that are dropped. Other I/O failures are returned.
pub async fn read_exact_within<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
    wait: Duration,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; len];
    match timeout(wait, reader.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(Some(buf)),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

/// Write all bytes and flush so nothing lingers in local buffers
pub async fn write_flushed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    buf: &[u8],
) -> std::io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}
