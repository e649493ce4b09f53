//! CR/LF line framing.
//!
//! Inbound bytes accumulate until the first `\r` or `\n`. The completed
//! line keeps its delimiter; a line made of the delimiter alone is
//! dropped, which swallows the `\n` of a `\r\n` pair. Outbound commands
//! are written verbatim, callers bring their own terminator.

use bytes::{BufMut, BytesMut};

pub struct LineCodec {}

impl LineCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_delimiter(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

impl tokio_util::codec::Decoder for LineCodec {
    type Item = String;
    type Error = crate::LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(pos) = src.iter().position(|b| is_delimiter(*b)) {
            let line = src.split_to(pos + 1);
            if line.len() > 1 {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
        Ok(None)
    }
}

impl tokio_util::codec::Encoder<String> for LineCodec {
    type Error = crate::LinkError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
