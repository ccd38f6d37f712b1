//! Tagged application messages shared by the demo client and server.
//!
//! The first byte selects the variant; the rest is the variant's body. All
//! integers are little-endian and strings are length-prefixed UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rudp_tokio::{NetError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoMessage {
    Text(String),
    Numbers(Vec<i32>),
    Blob(Bytes),
    Start,
}

impl DemoMessage {
    const TEXT: u8 = 1;
    const NUMBERS: u8 = 2;
    const BLOB: u8 = 3;
    const START: u8 = 10;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            DemoMessage::Text(text) => {
                buf.put_u8(Self::TEXT);
                buf.put_u32_le(text.len() as u32);
                buf.extend_from_slice(text.as_bytes());
            }
            DemoMessage::Numbers(numbers) => {
                buf.put_u8(Self::NUMBERS);
                buf.put_u32_le(numbers.len() as u32);
                for n in numbers {
                    buf.put_i32_le(*n);
                }
            }
            DemoMessage::Blob(data) => {
                buf.put_u8(Self::BLOB);
                buf.put_u32_le(data.len() as u32);
                buf.extend_from_slice(data);
            }
            DemoMessage::Start => buf.put_u8(Self::START),
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(NetError::malformed("empty message"));
        }
        let tag = buf.get_u8();
        let message = match tag {
            Self::TEXT => {
                let body = take_prefixed(&mut buf, 1)?;
                let text = String::from_utf8(body.to_vec())
                    .map_err(|_| NetError::malformed("text is not UTF-8"))?;
                DemoMessage::Text(text)
            }
            Self::NUMBERS => {
                let body = take_prefixed(&mut buf, 4)?;
                DemoMessage::Numbers(body.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
            }
            Self::BLOB => DemoMessage::Blob(take_prefixed(&mut buf, 1)?),
            Self::START => DemoMessage::Start,
            other => return Err(NetError::malformed(format!("unknown message tag {other}"))),
        };
        if buf.has_remaining() {
            return Err(NetError::malformed("trailing bytes"));
        }
        Ok(message)
    }
}

/// Read a u32 element count followed by `count * width` bytes
fn take_prefixed(buf: &mut Bytes, width: usize) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(NetError::malformed("missing length"));
    }
    let len = buf.get_u32_le() as usize * width;
    if buf.remaining() < len {
        return Err(NetError::malformed("truncated body"));
    }
    Ok(buf.split_to(len))
}
