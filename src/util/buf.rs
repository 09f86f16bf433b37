use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let raw = try_get_bytes(buf)?;
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}

pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_usize_varint(data.len());
    buf.put_slice(data);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()
        .map_err(|e| anyhow!("invalid length prefix: {:?}", e))?;
    if buf.remaining() < len {
        return Err(anyhow!("length prefix {} exceeds the remaining {} bytes", len, buf.remaining()));
    }
    Ok(buf.copy_to_bytes(len))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hällo");
        put_string(&mut buf, "");

        let mut b: &[u8] = &buf;
        assert_eq!(try_get_string(&mut b).unwrap(), "hällo");
        assert_eq!(try_get_string(&mut b).unwrap(), "");
        assert!(b.is_empty());
    }

    #[test]
    fn test_truncated() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[1, 2, 3, 4]);
        let truncated = &buf[..buf.len()-1];

        let mut b: &[u8] = truncated;
        assert!(try_get_bytes(&mut b).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);

        let mut b: &[u8] = &buf;
        assert!(try_get_string(&mut b).is_err());
    }
}
