//! Length-prefixed frame encoding/decoding for stream transports
//!
//! Wire format: [4-byte big-endian length][JSON payload]
//! Maximum frame size: 64KB (sanity limit, also the datagram cap)

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Envelope;

/// Maximum allowed frame size (64KB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Read a length-prefixed frame from a stream
///
/// A clean EOF at the frame boundary, or mid-frame, reports `PeerClosed`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(map_eof)?;

    let len = u32::from_be_bytes(len_buf);

    // Sanity check
    if len == 0 {
        return Err(Error::Protocol("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    // Read payload
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;

    // Deserialize
    Envelope::from_bytes(&payload).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Write a length-prefixed frame to a stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let payload = envelope
        .to_bytes()
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Envelope too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    // Write length prefix
    writer.write_all(&len.to_be_bytes()).await?;

    // Write payload
    writer.write_all(&payload).await?;

    // Flush to ensure delivery
    writer.flush().await?;

    Ok(())
}

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::PeerClosed
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let envelope = Envelope::chat("alice", "hello");

        // Write to buffer
        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).await.unwrap();

        // Read back
        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();

        assert_eq!(envelope, decoded);
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        // 4 zero bytes = length 0
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        // Length = MAX_FRAME_SIZE + 1, no payload follows
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_eof_is_peer_closed() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::PeerClosed)));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_peer_closed() {
        // Announces 100 bytes but the stream ends after 3
        let mut buf = 100u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::PeerClosed)));
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{{{");
        let mut cursor = Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back() {
        let first = Envelope::system("alice joined");
        let second = Envelope::chat("alice", "hi");

        let mut buf = Vec::new();
        write_frame(&mut buf, &first).await.unwrap();
        write_frame(&mut buf, &second).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), first);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), second);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::PeerClosed)
        ));
    }
}
