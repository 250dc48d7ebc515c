//! JPEG frame extraction from a `multipart/x-mixed-replace` byte stream.
//!
//! Camera firmware rarely sends reliable `Content-Length` part headers, so
//! frames are delimited by the JPEG start-of-image and end-of-image markers.
//! Boundary lines and part headers fall between frames and are discarded.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffered data grew past the configured limit without a complete frame.
#[derive(Debug, Error)]
#[error("no complete JPEG frame within {limit} buffered bytes")]
pub struct FrameOverflow {
    pub limit: usize,
}

/// Incremental JPEG splitter.
#[derive(Debug)]
pub struct JpegFrameExtractor {
    buffer: BytesMut,
    max_frame_bytes: usize,
}

impl JpegFrameExtractor {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_bytes,
        }
    }

    /// Append a chunk received from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered data, e.g. after the connection was replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Pop the next complete JPEG from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed. On overflow the buffer is
    /// cleared so a later call can resynchronise on the next start marker.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameOverflow> {
        match find_marker(&self.buffer, SOI, 0) {
            Some(start) => self.buffer.advance(start),
            None => {
                // Keep a trailing 0xFF: it may be the first half of a marker.
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let discard = self.buffer.len() - keep;
                self.buffer.advance(discard);
                return Ok(None);
            }
        }

        if let Some(end) = find_marker(&self.buffer, EOI, SOI.len()) {
            let frame = self.buffer.split_to(end + EOI.len()).freeze();
            if frame.len() > self.max_frame_bytes {
                return Err(FrameOverflow {
                    limit: self.max_frame_bytes,
                });
            }
            return Ok(Some(frame));
        }

        if self.buffer.len() > self.max_frame_bytes {
            self.buffer.clear();
            return Err(FrameOverflow {
                limit: self.max_frame_bytes,
            });
        }

        Ok(None)
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend_from_slice(payload);
        data.extend_from_slice(&EOI);
        data
    }

    fn part(payload: &[u8]) -> Vec<u8> {
        let body = jpeg(payload);
        let mut data = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        data.extend_from_slice(&body);
        data.extend_from_slice(b"\r\n");
        data
    }

    #[test]
    fn test_extracts_frame_from_multipart_part() {
        let mut extractor = JpegFrameExtractor::new(1024);
        extractor.push(&part(b"pixels"));

        let frame = extractor.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), jpeg(b"pixels").as_slice());
        assert!(extractor.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut extractor = JpegFrameExtractor::new(1024);
        let data = part(b"abcdef");
        let (head, tail) = data.split_at(data.len() / 2);

        extractor.push(head);
        assert!(extractor.next_frame().unwrap().is_none());

        extractor.push(tail);
        let frame = extractor.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), jpeg(b"abcdef").as_slice());
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut extractor = JpegFrameExtractor::new(1024);
        extractor.push(b"--frame\r\n\r\n\xFF");
        assert!(extractor.next_frame().unwrap().is_none());
        assert_eq!(extractor.buffered(), 1);

        extractor.push(b"\xD8body\xFF\xD9");
        let frame = extractor.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), jpeg(b"body").as_slice());
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut extractor = JpegFrameExtractor::new(1024);
        let mut data = part(b"one");
        data.extend_from_slice(&part(b"two"));
        extractor.push(&data);

        assert_eq!(
            extractor.next_frame().unwrap().unwrap().as_ref(),
            jpeg(b"one").as_slice()
        );
        assert_eq!(
            extractor.next_frame().unwrap().unwrap().as_ref(),
            jpeg(b"two").as_slice()
        );
        assert!(extractor.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_garbage_without_start_marker_is_discarded() {
        let mut extractor = JpegFrameExtractor::new(16);
        extractor.push(&[0u8; 64]);
        assert!(extractor.next_frame().unwrap().is_none());
        assert_eq!(extractor.buffered(), 0);
    }

    #[test]
    fn test_complete_frame_over_limit_is_rejected() {
        let mut extractor = JpegFrameExtractor::new(16);
        let mut data = jpeg(&[0x22; 32]);
        data.extend_from_slice(&jpeg(b"ok"));
        extractor.push(&data);

        assert!(extractor.next_frame().is_err());
        assert_eq!(
            extractor.next_frame().unwrap().unwrap().as_ref(),
            jpeg(b"ok").as_slice()
        );
    }

    #[test]
    fn test_overflow_without_end_marker() {
        let mut extractor = JpegFrameExtractor::new(16);
        let mut data = SOI.to_vec();
        data.extend_from_slice(&[0x11; 32]);
        extractor.push(&data);

        let err = extractor.next_frame().unwrap_err();
        assert_eq!(err.limit, 16);
        assert_eq!(extractor.buffered(), 0);
    }
}
