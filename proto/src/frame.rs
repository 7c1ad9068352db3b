//! Fixed-size frames: exactly [`FRAME_LEN`] bytes on the wire, UTF-8 text padded with NUL.
//! The receiver reads up to the first NUL; every frame is built in a fresh buffer.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

pub const FRAME_LEN: usize = 256;

/// Whether `text` can be sent as one frame.
pub fn fits_frame(text: &str) -> bool {
    text.len() <= FRAME_LEN && !text.as_bytes().contains(&0)
}

/// Pad `text` into a frame. Over-long text is rejected rather than truncated.
pub fn encode_frame(text: &str) -> Result<[u8; FRAME_LEN], ProtocolError> {
    let bytes = text.as_bytes();
    if bytes.len() > FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: bytes.len(),
            max: FRAME_LEN,
        });
    }
    if bytes.contains(&0) {
        return Err(ProtocolError::EmbeddedNul);
    }
    let mut buf = [0u8; FRAME_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

pub fn decode_frame(buf: &[u8; FRAME_LEN]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(FRAME_LEN);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(text)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream (including mid-frame);
/// callers tear the connection down instead of polling again.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_LEN];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(Some(decode_frame(&buf))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
