//! Frame source — delimited-message view over a raw byte stream.
//!
//! [`FrameSource`] decorates any [`AsyncRead`] so the handshake and the
//! steady-state handler depend on a single "emits delimited messages"
//! abstraction regardless of whether framing is enabled:
//!
//! - with no delimiter, every read chunk is emitted as one frame;
//! - with a text or byte delimiter, raw bytes are buffered in a
//!   [`BytesMut`] and frames are emitted on delimiter boundaries, the
//!   delimiter optionally retained.
//!
//! The buffer is bounded: if no delimiter shows up within
//! `max_frame_size` bytes the source fails instead of growing without
//! limit. Partial data left in the buffer when the stream ends is
//! discarded — a frame only exists once its delimiter has arrived.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ConnectionConfig;
use crate::error::{PeerlinkError, Result};

/// Default maximum frame size (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

const READ_CHUNK: usize = 4 * 1024;

enum Splitter {
    /// Pass every read chunk through as one frame.
    Raw,
    /// Split on a byte sequence.
    Delimiter {
        needle: Vec<u8>,
        retain: bool,
        /// Buffer offset already known not to contain the needle, so
        /// repeated reads do not rescan from the start.
        scanned: usize,
    },
}

/// Buffers raw bytes from a reader and yields one frame at a time.
pub struct FrameSource<R> {
    reader: R,
    buffer: BytesMut,
    splitter: Splitter,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameSource<R> {
    /// Wrap `reader` with the framing configured in `config`.
    pub fn new(reader: R, config: &ConnectionConfig) -> Self {
        let splitter = match config.delimiter() {
            None => Splitter::Raw,
            Some((needle, retain)) => Splitter::Delimiter {
                needle,
                retain,
                scanned: 0,
            },
        };
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            splitter,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Override the maximum frame size.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Next complete frame, or `None` when the stream has ended.
    ///
    /// Cancel-safe: a frame is extracted synchronously once its bytes are
    /// buffered, and a dropped read leaves partial bytes in the buffer for
    /// the next call.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.try_extract()? {
                return Ok(Some(frame));
            }

            self.buffer.reserve(READ_CHUNK);
            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(
                        pending = self.buffer.len(),
                        "stream ended with partial frame, discarding"
                    );
                }
                return Ok(None);
            }
        }
    }

    /// Try to extract a single frame from the buffered bytes.
    fn try_extract(&mut self) -> Result<Option<Bytes>> {
        match &mut self.splitter {
            Splitter::Raw => {
                if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(self.buffer.split().freeze()))
                }
            }
            Splitter::Delimiter {
                needle,
                retain,
                scanned,
            } => {
                let at = find(&self.buffer[*scanned..], needle).map(|i| i + *scanned);
                match at {
                    Some(at) => {
                        let mut frame = self.buffer.split_to(at + needle.len());
                        if !*retain {
                            frame.truncate(at);
                        }
                        *scanned = 0;
                        Ok(Some(frame.freeze()))
                    }
                    None => {
                        if self.buffer.len() > self.max_frame_size {
                            return Err(PeerlinkError::FrameOverflow {
                                max: self.max_frame_size,
                            });
                        }
                        // Everything up to a possible needle prefix at the
                        // tail has been ruled out.
                        *scanned = self
                            .buffer
                            .len()
                            .saturating_sub(needle.len().saturating_sub(1));
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Framing;
    use tokio::io::{duplex, AsyncWriteExt};

    fn text_config(delimiter: &str, retain: bool) -> ConnectionConfig {
        ConnectionConfig {
            framing: Framing::Text {
                delimiter: delimiter.into(),
                retain,
            },
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_raw_mode_emits_read_chunks() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &ConnectionConfig::default());

        tx.write_all(b"chunk").await.unwrap();
        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"chunk");
    }

    #[tokio::test]
    async fn test_newline_framing_strips_delimiter() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\n", false));

        tx.write_all(b"hello\nworld\n").await.unwrap();
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"hello");
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn test_retained_delimiter_stays_in_frame() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\n", true));

        tx.write_all(b"hello\n").await.unwrap();
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"hello\n");
    }

    #[tokio::test]
    async fn test_delimiter_split_across_reads() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\r\n", false));

        tx.write_all(b"part\r").await.unwrap();
        tx.write_all(b"\nnext\r\n").await.unwrap();

        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"part");
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"next");
    }

    #[tokio::test]
    async fn test_byte_delimiter() {
        let (mut tx, rx) = duplex(256);
        let config = ConnectionConfig {
            framing: Framing::Bytes {
                delimiter: vec![0x7E],
                retain: false,
            },
            ..ConnectionConfig::default()
        };
        let mut source = FrameSource::new(rx, &config);

        tx.write_all(&[0x01, 0x02, 0x7E, 0x03, 0x7E]).await.unwrap();
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], &[0x01, 0x02]);
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], &[0x03]);
    }

    #[tokio::test]
    async fn test_eof_discards_partial_frame() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\n", false));

        tx.write_all(b"no delimiter").await.unwrap();
        drop(tx);

        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_after_complete_frame() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\n", false));

        tx.write_all(b"last\n").await.unwrap();
        drop(tx);

        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"last");
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overflow_without_delimiter() {
        let (mut tx, rx) = duplex(1024);
        let mut source = FrameSource::new(rx, &text_config("\n", false)).with_max_frame_size(16);

        tx.write_all(&[b'x'; 64]).await.unwrap();
        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, PeerlinkError::FrameOverflow { max: 16 }));
    }

    #[tokio::test]
    async fn test_empty_frame_between_delimiters() {
        let (mut tx, rx) = duplex(256);
        let mut source = FrameSource::new(rx, &text_config("\n", false));

        tx.write_all(b"a\n\nb\n").await.unwrap();
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"a");
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"");
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"b");
    }

    #[test]
    fn test_find_needle() {
        assert_eq!(find(b"abcdef", b"cd"), Some(2));
        assert_eq!(find(b"abcdef", b"xy"), None);
        assert_eq!(find(b"ab", b"abc"), None);
        assert_eq!(find(b"abc", b""), None);
    }
}
