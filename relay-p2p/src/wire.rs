//! Framing: 2-byte big-endian length prefix + Noise message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_SIZE: usize = 2;

/// Encode a Noise message into a single frame.
pub fn encode_frame(msg: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(msg.len()).map_err(|_| FrameError::TooLarge(msg.len()))?;
    let mut out = Vec::with_capacity(LEN_SIZE + msg.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(msg);
    Ok(out)
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FrameError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameError::NeedMore);
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameError::NeedMore);
    }
    Ok((&bytes[LEN_SIZE..LEN_SIZE + len], LEN_SIZE + len))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, msg: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one frame. A clean EOF before the length prefix yields `Closed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut msg = vec![0u8; len];
    reader.read_exact(&mut msg).await?;
    Ok(msg)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
