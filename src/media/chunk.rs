//! Media chunks
//!
//! A chunk is one contiguous slice of the media byte stream, exactly as it
//! was read from the producer. Chunks share their backing allocation with
//! every consumer they are forwarded to.

use bytes::Bytes;

/// Absolute byte position in the media stream
pub type Offset = u64;

/// A contiguous slice of the media stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Offset of the first byte of `data`
    pub start: Offset,
    /// Chunk bytes (reference counted, never copied)
    pub data: Bytes,
}

impl MediaChunk {
    /// Create a new chunk
    pub fn new(start: Offset, data: Bytes) -> Self {
        Self { start, data }
    }

    /// Offset one past the last byte of the chunk
    pub fn end(&self) -> Offset {
        self.start + self.data.len() as Offset
    }

    /// Number of bytes in the chunk
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the chunk carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if `offset` falls within `[start, end)`
    pub fn contains(&self, offset: Offset) -> bool {
        self.start <= offset && offset < self.end()
    }

    /// View of the chunk starting at `offset`
    ///
    /// Offsets before the chunk yield the whole chunk; offsets past its end
    /// yield an empty view.
    pub fn suffix_from(&self, offset: Offset) -> Bytes {
        if offset <= self.start {
            self.data.clone()
        } else {
            let skip = ((offset - self.start) as usize).min(self.data.len());
            self.data.slice(skip..)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bounds() {
        let chunk = MediaChunk::new(100, Bytes::from_static(b"0123456789"));

        assert_eq!(chunk.end(), 110);
        assert_eq!(chunk.len(), 10);
        assert!(chunk.contains(100));
        assert!(chunk.contains(109));
        assert!(!chunk.contains(110));
        assert!(!chunk.contains(99));
    }

    #[test]
    fn test_suffix_from() {
        let chunk = MediaChunk::new(100, Bytes::from_static(b"0123456789"));

        assert_eq!(&chunk.suffix_from(50)[..], b"0123456789");
        assert_eq!(&chunk.suffix_from(104)[..], b"456789");
        assert!(chunk.suffix_from(200).is_empty());
    }

    #[test]
    fn test_suffix_shares_allocation() {
        let chunk = MediaChunk::new(0, Bytes::from(vec![7u8; 64]));
        let suffix = chunk.suffix_from(16);

        assert_eq!(suffix.as_ptr(), chunk.data[16..].as_ptr());
    }
}
