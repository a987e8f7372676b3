//! End-of-message framing for the NETCONF 1.0 wire encoding

use memmem::{Searcher, TwoWaySearcher};

use crate::error::Error;

/// The NETCONF 1.0 end-of-message delimiter.
pub const DELIMITER: &[u8] = b"]]>]]>";

/// Upper bound on buffered bytes, delimiter included.
pub const MAX_BUFFERED: usize = 50 * 1024 * 1024;

/// Splits an incoming byte stream into messages on the `]]>]]>` delimiter.
///
/// The framer is synchronous and holds no reference to the transport; the
/// session feeds it chunks as they arrive and drains complete messages.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> MessageFramer {
        MessageFramer { buffer: Vec::new() }
    }

    /// Appends a chunk. Fails with [`Error::FrameOverflow`] when the total
    /// buffered bytes would exceed [`MAX_BUFFERED`]; the buffer is left
    /// untouched in that case and previously framed messages remain
    /// extractable.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if self.buffer.len() + chunk.len() > MAX_BUFFERED {
            return Err(Error::FrameOverflow);
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Removes and returns the next complete message, without its
    /// delimiter. Returns `None` until a full delimiter has been buffered.
    pub fn extract(&mut self) -> Option<Vec<u8>> {
        let search = TwoWaySearcher::new(DELIMITER);
        let pos = search.search_in(&self.buffer)?;
        let message = self.buffer[..pos].to_vec();
        self.buffer.drain(0..pos + DELIMITER.len());
        Some(message)
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter() {
        let mut framer = MessageFramer::new();
        framer.append(b"foo]]>]]>bar]]>]]>").unwrap();
        assert_eq!(framer.extract(), Some(b"foo".to_vec()));
        assert_eq!(framer.extract(), Some(b"bar".to_vec()));
        assert_eq!(framer.extract(), None);
    }

    #[test]
    fn reassembles_across_chunk_boundaries() {
        // the delimiter itself may be split between reads
        let stream = b"<a>1</a>]]>]]><b>2</b>]]>]]>";
        for chunk_len in 1..stream.len() {
            let mut framer = MessageFramer::new();
            let mut messages = Vec::new();
            for chunk in stream.chunks(chunk_len) {
                framer.append(chunk).unwrap();
                while let Some(message) = framer.extract() {
                    messages.push(message);
                }
            }
            assert_eq!(
                messages,
                vec![b"<a>1</a>".to_vec(), b"<b>2</b>".to_vec()],
                "chunk_len {}",
                chunk_len
            );
        }
    }

    #[test]
    fn oversized_append_is_rejected_and_harmless() {
        let mut framer = MessageFramer::new();
        framer.append(b"kept]]>]]>").unwrap();
        let huge = vec![b'x'; MAX_BUFFERED];
        assert!(matches!(framer.append(&huge), Err(Error::FrameOverflow)));
        // prior content is intact
        assert_eq!(framer.extract(), Some(b"kept".to_vec()));
        assert_eq!(framer.extract(), None);
    }

    #[test]
    fn clear_discards_partial_input() {
        let mut framer = MessageFramer::new();
        framer.append(b"partial message without delimiter").unwrap();
        framer.clear();
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.extract(), None);
    }
}
