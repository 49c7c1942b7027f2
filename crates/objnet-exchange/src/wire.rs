//! Wire framing: each frame is a 4-byte big-endian length followed by one
//! CBOR-encoded object.

use bytes::{Bytes, BytesMut};
use objnet_core::Object;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};

use crate::error::TransportError;
use crate::transport::BoxedStream;

/// Default maximum frame size (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// A stream carrying objects.
pub type FramedStream = Framed<BoxedStream, ObjectCodec>;

/// Length-delimited CBOR object codec.
#[derive(Debug)]
pub struct ObjectCodec {
    frames: LengthDelimitedCodec,
    max_frame_size: usize,
}

impl ObjectCodec {
    pub fn new(max_frame_size: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(max_frame_size)
            .new_codec();
        Self {
            frames,
            max_frame_size,
        }
    }
}

impl Default for ObjectCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for ObjectCodec {
    type Item = Object;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Object>, TransportError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(Object::from_cbor(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Object> for ObjectCodec {
    type Error = TransportError;

    fn encode(&mut self, object: Object, dst: &mut BytesMut) -> Result<(), TransportError> {
        let bytes = object.to_cbor()?;
        if bytes.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: bytes.len(),
                max: self.max_frame_size,
            });
        }
        self.frames.encode(Bytes::from(bytes), dst)?;
        Ok(())
    }
}

/// Wrap a raw stream in object framing.
pub fn framed(stream: BoxedStream, max_frame_size: usize) -> FramedStream {
    Framed::new(stream, ObjectCodec::new(max_frame_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let object = Object::new("test/msg").with_field("body", "hi");
        let mut codec = ObjectCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(object.clone(), &mut buf).unwrap();

        let body = object.to_cbor().unwrap();
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], &body[..]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, object);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let object = Object::new("test/msg").with_field("body", "hi");
        let mut codec = ObjectCodec::default();
        let mut full = BytesMut::new();
        codec.encode(object.clone(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), object);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let object = Object::new("test/blob").with_field("data", vec![0u8; 256]);
        let mut codec = ObjectCodec::new(64);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(object, &mut buf),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }
}
