use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const HEADER_SIZE: usize = 4;

/// Codec for tether frames: `[4 bytes big-endian payload length][JSON payload]`.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a message with framing.
    pub fn encode(msg: &Message) -> ProtocolResult<Vec<u8>> {
        let payload = Self::encode_payload(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Message, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = Self::payload_len([data[0], data[1], data[2], data[3]])?;
        let total = HEADER_SIZE + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_payload(&data[HEADER_SIZE..total])?;
        Ok((msg, total))
    }

    /// Encode payload only (no framing).
    pub fn encode_payload(msg: &Message) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode payload only (no framing).
    pub fn decode_payload(data: &[u8]) -> ProtocolResult<Message> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Read one frame from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary; an
    /// end of stream inside a frame is an I/O error.
    pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Message>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = Self::payload_len(header)?;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Self::decode_payload(&payload).map(Some)
    }

    /// Write one frame to a stream and flush it.
    pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Self::encode(msg)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn payload_len(header: [u8; HEADER_SIZE]) -> ProtocolResult<usize> {
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RemoteError;
    use serde_json::json;
    use tether_types::RequestId;

    fn sample() -> Message {
        Message::request(RequestId::new(1), "synchronize-solution", &json!({"x": [1, 2]})).unwrap()
    }

    #[test]
    fn frame_roundtrip() {
        let msg = sample();
        let encoded = FrameCodec::encode(&msg).unwrap();
        let (decoded, consumed) = FrameCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_consumes_one_frame_of_many() {
        let mut buf = FrameCodec::encode(&sample()).unwrap();
        let first = buf.len();
        buf.extend(FrameCodec::encode(&Message::error(RequestId::new(1), RemoteError::canceled())).unwrap());
        let (_, consumed) = FrameCodec::decode(&buf).unwrap();
        assert_eq!(consumed, first);
        let (second, _) = FrameCodec::decode(&buf[first..]).unwrap();
        assert!(matches!(second, Message::Response { outcome: Err(_), .. }));
    }

    #[test]
    fn decode_too_short() {
        assert!(matches!(
            FrameCodec::decode(&[0, 0]),
            Err(ProtocolError::FramingError(_))
        ));
    }

    #[test]
    fn decode_incomplete() {
        let encoded = FrameCodec::encode(&sample()).unwrap();
        assert!(matches!(
            FrameCodec::decode(&encoded[..encoded.len() - 1]),
            Err(ProtocolError::FramingError(_))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let header = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        assert!(matches!(
            FrameCodec::decode(&header),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn oversized_message_rejected_on_encode() {
        let big = "x".repeat(MAX_FRAME_SIZE);
        let msg = Message::notification("cancel", &big).unwrap();
        assert!(matches!(
            FrameCodec::encode(&msg),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn garbage_payload_rejected() {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{{{");
        assert!(matches!(
            FrameCodec::decode(&buf),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn async_frames_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = sample();
        FrameCodec::write_frame(&mut a, &msg).await.unwrap();
        let note = Message::notification("release-pin", &json!({"pin": 1})).unwrap();
        FrameCodec::write_frame(&mut a, &note).await.unwrap();
        drop(a);

        assert_eq!(FrameCodec::read_frame(&mut b).await.unwrap(), Some(msg));
        assert_eq!(FrameCodec::read_frame(&mut b).await.unwrap(), Some(note));
        assert_eq!(FrameCodec::read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_frame_is_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let encoded = FrameCodec::encode(&sample()).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, &encoded[..encoded.len() - 2])
            .await
            .unwrap();
        drop(a);
        assert!(matches!(
            FrameCodec::read_frame(&mut b).await,
            Err(ProtocolError::Io(_))
        ));
    }
}
