use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::util::buf::{put_bytes, put_string, try_get_bytes, try_get_string};


#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageKind {
    Text = 1,
    Binary = 2,
}

/// An application level message.
///
/// [Message::KeepAlive] is the heartbeat. It maps to the empty packet and never goes through the
///  codec, and it is never delivered to application handlers. All other messages are encoded as a
///  kind byte followed by a varint length and the content.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Message {
    KeepAlive,
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, Message::KeepAlive)
    }

    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Message::KeepAlive => None,
            Message::Text(_) => Some(MessageKind::Text),
            Message::Binary(_) => Some(MessageKind::Binary),
        }
    }

    /// NB: a keep alive message serializes to nothing
    pub fn ser(&self, buf: &mut BytesMut) {
        let kind = match self.kind() {
            Some(kind) => kind,
            None => return,
        };
        buf.put_u8(kind.into());
        match self {
            Message::KeepAlive => {}
            Message::Text(s) => put_string(buf, s),
            Message::Binary(data) => put_bytes(buf, data),
        }
    }

    pub fn to_packet(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Message> {
        if !buf.has_remaining() {
            bail!("missing message kind");
        }
        let raw_kind = buf.get_u8();
        let kind = MessageKind::try_from_primitive(raw_kind)
            .map_err(|_| anyhow!("invalid message kind {}", raw_kind))?;

        match kind {
            MessageKind::Text => Ok(Message::Text(try_get_string(buf)?)),
            MessageKind::Binary => Ok(Message::Binary(try_get_bytes(buf)?)),
        }
    }

    /// The empty packet is a keep alive. Trailing data after a message is an error.
    pub fn from_packet(packet: Bytes) -> anyhow::Result<Message> {
        if packet.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let mut buf = packet;
        let message = Self::try_deser(&mut buf)?;
        if buf.has_remaining() {
            bail!("{} bytes of trailing data after message", buf.remaining());
        }
        Ok(message)
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::keep_alive(Message::KeepAlive)]
    #[case::text(Message::Text("hello".to_string()))]
    #[case::empty_text(Message::Text("".to_string()))]
    #[case::binary(Message::Binary(Bytes::from_static(&[0, 1, 2, 255])))]
    fn test_packet_round_trip(#[case] message: Message) {
        let packet = message.to_packet();
        assert_eq!(packet.is_empty(), message.is_keep_alive());
        assert_eq!(Message::from_packet(packet).unwrap(), message);
    }

    #[test]
    fn test_text_encoding() {
        let packet = Message::Text("ab".to_string()).to_packet();
        assert_eq!(packet.as_ref(), &[1, 2, b'a', b'b']);
    }

    #[rstest]
    #[case::unknown_kind(vec![9, 0])]
    #[case::zero_kind(vec![0])]
    #[case::truncated(vec![1, 5, b'a'])]
    #[case::trailing(vec![2, 1, 7, 7])]
    #[case::invalid_utf8(vec![1, 1, 0xff])]
    fn test_invalid_packet(#[case] packet: Vec<u8>) {
        assert!(Message::from_packet(Bytes::from(packet)).is_err());
    }
}
