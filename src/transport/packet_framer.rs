use std::io::ErrorKind;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use crate::error::{TransportError, TransportResult};


/// length of the packet length prefix: a signed 32 bit integer, little endian
pub const LENGTH_PREFIX_LEN: usize = 4;

/// the largest payload a length prefix can describe
pub const MAX_PREFIXED_LEN: usize = i32::MAX as usize;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PacketRead {
    Packet(Bytes),
    /// the peer closed the stream, either between packets or in the middle of one
    StreamEnded,
}

pub struct PacketReader<R> {
    reader: R,
    max_packet_len: usize,
}

impl <R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R, max_packet_len: usize) -> PacketReader<R> {
        PacketReader {
            reader,
            max_packet_len: max_packet_len.min(MAX_PREFIXED_LEN),
        }
    }

    /// Reads a single packet. A negative or oversized length prefix is a framing error that
    ///  consumes the prefix but nothing else.
    pub async fn read_packet(&mut self) -> TransportResult<PacketRead> {
        let raw_len = match self.read_length_prefix().await? {
            Some(len) => len,
            None => return Ok(PacketRead::StreamEnded),
        };
        let len = self.check_length(raw_len)?;
        self.read_body(len).await
    }

    /// `None` means the stream ended before a complete prefix was read
    pub async fn read_length_prefix(&mut self) -> TransportResult<Option<i32>> {
        let mut buf = [0u8; LENGTH_PREFIX_LEN];
        let mut num_read = 0;
        while num_read < LENGTH_PREFIX_LEN {
            let n = self.reader.read(&mut buf[num_read..]).await?;
            if n == 0 {
                if num_read > 0 {
                    trace!("stream ended after {} bytes of a length prefix", num_read);
                }
                return Ok(None);
            }
            num_read += n;
        }
        Ok(Some(i32::from_le_bytes(buf)))
    }

    pub fn check_length(&self, raw_len: i32) -> TransportResult<usize> {
        if raw_len < 0 {
            return Err(TransportError::NegativePacketLength(raw_len));
        }
        let len = raw_len as usize;
        if len > self.max_packet_len {
            return Err(TransportError::PacketTooLarge { len, max: self.max_packet_len });
        }
        Ok(len)
    }

    pub async fn read_body(&mut self, len: usize) -> TransportResult<PacketRead> {
        if len == 0 {
            return Ok(PacketRead::Packet(Bytes::new()));
        }

        let mut buf = BytesMut::zeroed(len);
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(PacketRead::Packet(buf.freeze())),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                trace!("stream ended in the middle of a {} byte packet", len);
                Ok(PacketRead::StreamEnded)
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub struct PacketWriter<W> {
    writer: W,
    max_packet_len: usize,
}

impl <W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W, max_packet_len: usize) -> PacketWriter<W> {
        PacketWriter {
            writer,
            max_packet_len: max_packet_len.min(MAX_PREFIXED_LEN),
        }
    }

    /// Writes length prefix and payload with a single `write_all`. This does *not* serialize
    ///  concurrent writers, that is the caller's responsibility.
    pub async fn write_packet(&mut self, payload: &[u8]) -> TransportResult<()> {
        let too_large = || TransportError::PacketTooLarge { len: payload.len(), max: self.max_packet_len };
        if payload.len() > self.max_packet_len {
            return Err(too_large());
        }
        let len = i32::try_from(payload.len())
            .map_err(|_| too_large())?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        buf.put_i32_le(len);
        buf.put_slice(payload);

        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> TransportResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::duplex;
    use super::*;

    const MAX: usize = 1024*1024;

    #[rstest]
    #[case::empty(vec![])]
    #[case::single(vec![7])]
    #[case::text(b"hello world".to_vec())]
    #[case::large((0..100_000).map(|i| (i % 251) as u8).collect())]
    #[tokio::test]
    async fn test_write_read(#[case] payload: Vec<u8>) {
        // a tiny buffer forces partial reads and writes
        let (a, b) = duplex(1);
        let mut writer = PacketWriter::new(a, MAX);
        let mut reader = PacketReader::new(b, MAX);

        let expected = payload.clone();
        let write_handle = tokio::spawn(async move {
            writer.write_packet(&payload).await.unwrap();
            writer.write_packet(&[1, 2]).await.unwrap();
        });

        assert_eq!(reader.read_packet().await.unwrap(), PacketRead::Packet(Bytes::from(expected)));
        assert_eq!(reader.read_packet().await.unwrap(), PacketRead::Packet(Bytes::from_static(&[1, 2])));
        write_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wire_format() {
        let mut writer = PacketWriter::new(Vec::new(), MAX);
        writer.write_packet(b"abc").await.unwrap();
        writer.write_packet(b"").await.unwrap();
        assert_eq!(writer.writer, vec![3, 0, 0, 0, b'a', b'b', b'c', 0, 0, 0, 0]);
    }

    #[rstest]
    #[case::minus_one(-1)]
    #[case::min(i32::MIN)]
    #[tokio::test]
    async fn test_negative_length(#[case] len: i32) {
        let mut wire = len.to_le_bytes().to_vec();
        wire.extend_from_slice(&[1, 2, 3, 4]);
        let mut reader = PacketReader::new(wire.as_slice(), MAX);
        assert_eq!(reader.read_packet().await, Err(TransportError::NegativePacketLength(len)));
    }

    #[tokio::test]
    async fn test_too_large() {
        let wire = 11i32.to_le_bytes();
        let mut reader = PacketReader::new(wire.as_slice(), 10);
        assert_eq!(reader.read_packet().await, Err(TransportError::PacketTooLarge { len: 11, max: 10 }));

        let mut writer = PacketWriter::new(Vec::new(), 10);
        assert!(writer.write_packet(&[0; 11]).await.is_err());
        assert!(writer.writer.is_empty());
    }

    #[test]
    fn test_max_len_is_capped_by_prefix() {
        let writer = PacketWriter::new(Vec::new(), usize::MAX);
        assert_eq!(writer.max_packet_len, MAX_PREFIXED_LEN);

        let reader = PacketReader::new(&b""[..], usize::MAX);
        assert_eq!(reader.max_packet_len, MAX_PREFIXED_LEN);
        assert_eq!(reader.check_length(i32::MAX), Ok(MAX_PREFIXED_LEN));
    }

    #[rstest]
    #[case::no_data(vec![])]
    #[case::partial_prefix(vec![3, 0])]
    #[case::partial_body(vec![3, 0, 0, 0, 1])]
    #[tokio::test]
    async fn test_stream_ended(#[case] wire: Vec<u8>) {
        let mut reader = PacketReader::new(wire.as_slice(), MAX);
        assert_eq!(reader.read_packet().await, Ok(PacketRead::StreamEnded));
    }
}
