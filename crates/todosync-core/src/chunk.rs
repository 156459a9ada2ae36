//! Type-length-value chunk framing.
//!
//! A chunk is `{tag: u8, length: u16 BE, body: length bytes}`. A buffer is a
//! flat run of sibling chunks; bodies may themselves hold chunks. Reading
//! goes through [`ChunkCursor`], which checks every declared length against
//! what is left. Writing goes through [`ChunkWriter`], which reserves the
//! header, writes the body and then patches the length in.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::wire::Field;

/// Size of a chunk header: tag byte plus 16-bit length.
pub const HEADER_LEN: usize = 3;

/// Largest body a single chunk can declare.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// A borrowed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub tag: u8,
    pub body: &'a [u8],
}

/// Bounds-checked reader over a run of sibling chunks.
///
/// Yields `Err` at most once; after an error the cursor is exhausted.
#[derive(Debug, Clone)]
pub struct ChunkCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChunkCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read the next chunk, or `None` once the buffer is fully consumed.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk<'a>>, CodecError> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }

        if rest.len() < HEADER_LEN {
            let err = CodecError::TruncatedHeader {
                offset: self.pos,
                remaining: rest.len(),
            };
            self.pos = self.buf.len();
            return Err(err);
        }

        let tag = rest[0];
        let declared = usize::from(u16::from_be_bytes([rest[1], rest[2]]));
        let available = rest.len() - HEADER_LEN;
        if declared > available {
            self.pos = self.buf.len();
            return Err(CodecError::ChunkOverrun {
                tag,
                declared,
                available,
            });
        }

        let body = &rest[HEADER_LEN..HEADER_LEN + declared];
        self.pos += HEADER_LEN + declared;
        Ok(Some(Chunk { tag, body }))
    }
}

impl<'a> Iterator for ChunkCursor<'a> {
    type Item = Result<Chunk<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Read a 4-byte big-endian integer field body.
pub fn read_i32(field: Field, body: &[u8]) -> Result<i32, CodecError> {
    let bytes: [u8; 4] = body.try_into().map_err(|_| CodecError::BadIntegerLength {
        field,
        len: body.len(),
    })?;
    Ok(i32::from_be_bytes(bytes))
}

/// Read a text field body.
pub fn read_text(field: Field, body: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(body)
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidText(field))
}

/// Builder for chunk buffers with bottom-up length computation.
#[derive(Debug, Default)]
pub struct ChunkWriter {
    buf: BytesMut,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a chunk whose body is produced by `body`.
    ///
    /// Nested chunks may be written from inside the closure. On error the
    /// partially written chunk is discarded.
    pub fn chunk<F>(&mut self, tag: u8, body: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut ChunkWriter) -> Result<(), CodecError>,
    {
        let start = self.buf.len();
        self.buf.put_u8(tag);
        self.buf.put_u16(0);

        if let Err(e) = body(self) {
            self.buf.truncate(start);
            return Err(e);
        }

        let body_len = self.buf.len() - start - HEADER_LEN;
        let Ok(len) = u16::try_from(body_len) else {
            self.buf.truncate(start);
            return Err(CodecError::ChunkTooLarge { tag, len: body_len });
        };
        self.buf[start + 1..start + HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }

    /// Write a chunk with a raw byte body.
    pub fn bytes(&mut self, tag: u8, body: &[u8]) -> Result<(), CodecError> {
        self.chunk(tag, |w| {
            w.buf.put_slice(body);
            Ok(())
        })
    }

    /// Write a chunk holding a 4-byte big-endian integer.
    pub fn int(&mut self, tag: u8, value: i32) -> Result<(), CodecError> {
        self.chunk(tag, |w| {
            w.buf.put_i32(value);
            Ok(())
        })
    }

    /// Finish and return the encoded buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_siblings() {
        let buf = [0x11, 0x00, 0x02, b'h', b'i', 0x13, 0x00, 0x00];
        let chunks: Vec<_> = ChunkCursor::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk { tag: 0x11, body: b"hi" },
                Chunk { tag: 0x13, body: b"" },
            ]
        );
    }

    #[test]
    fn test_cursor_rejects_overrun() {
        let buf = [0x11, 0x00, 0x05, b'h', b'i'];
        let mut cursor = ChunkCursor::new(&buf);
        assert_eq!(
            cursor.next_chunk(),
            Err(CodecError::ChunkOverrun {
                tag: 0x11,
                declared: 5,
                available: 2
            })
        );
        // Exhausted after the error.
        assert_eq!(cursor.next_chunk(), Ok(None));
    }

    #[test]
    fn test_cursor_rejects_truncated_header() {
        let buf = [0x11, 0x00, 0x00, 0x12, 0x00];
        let mut cursor = ChunkCursor::new(&buf);
        assert!(cursor.next_chunk().unwrap().is_some());
        assert_eq!(
            cursor.next_chunk(),
            Err(CodecError::TruncatedHeader {
                offset: 3,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_writer_patches_nested_lengths() {
        let mut w = ChunkWriter::new();
        w.chunk(0x01, |w| {
            w.int(0x10, 258)?;
            w.bytes(0x11, b"abc")
        })
        .unwrap();
        let buf = w.finish();

        assert_eq!(
            buf.as_ref(),
            &[0x01, 0x00, 0x0d, 0x10, 0x00, 0x04, 0x00, 0x00, 0x01, 0x02, 0x11, 0x00, 0x03, b'a', b'b', b'c']
        );
    }

    #[test]
    fn test_writer_rejects_oversized_body() {
        let mut w = ChunkWriter::new();
        w.int(0x10, 1).unwrap();
        let big = vec![0u8; MAX_BODY_LEN + 1];
        assert_eq!(
            w.bytes(0x11, &big),
            Err(CodecError::ChunkTooLarge {
                tag: 0x11,
                len: MAX_BODY_LEN + 1
            })
        );
        // The failed chunk left nothing behind.
        assert_eq!(w.len(), 7);
    }

    #[test]
    fn test_read_i32_requires_four_bytes() {
        assert_eq!(read_i32(Field::Priority, &[0, 0, 0, 9]), Ok(9));
        assert_eq!(read_i32(Field::Id, &[0xff, 0xff, 0xff, 0xff]), Ok(-1));
        assert_eq!(
            read_i32(Field::Revision, &[0, 1]),
            Err(CodecError::BadIntegerLength {
                field: Field::Revision,
                len: 2
            })
        );
    }
}
