//! Seekable byte stream over a remote resource.
//!
//! Columnar readers seek to the footer, then jump between row-group column
//! chunks issuing many small reads. A single read-ahead window turns those
//! into a handful of range requests without materializing the file.

use super::range::RangeReader;
use crate::error::CacheError;
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};

/// Random-access view of a remote resource backed by one buffer window.
pub struct SeekableRemoteStream {
    reader: RangeReader,
    length: u64,
    position: u64,
    buffer: Bytes,
    buffer_start: u64,
    read_ahead: usize,
}

impl SeekableRemoteStream {
    /// Open a stream; resolves the resource length up front.
    pub fn open(reader: RangeReader, read_ahead: usize) -> Result<Self, CacheError> {
        let length = reader.length()?;
        Ok(Self {
            reader,
            length,
            position: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
            read_ahead: read_ahead.max(1),
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn url(&self) -> &str {
        self.reader.url()
    }

    pub fn etag(&self) -> Option<String> {
        self.reader.etag()
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Move the logical position; no I/O happens until the next read.
    pub fn seek_to(&mut self, position: u64) {
        self.position = position;
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    /// Read up to `n` bytes from the current position, or everything that
    /// remains when `n` is `None`.
    ///
    /// Returns fewer bytes only at end of stream. A request fully inside the
    /// current window is served without touching the network; otherwise a new
    /// window of `max(n, read_ahead)` bytes (clamped to the resource length)
    /// replaces the buffer.
    pub fn read_bytes(&mut self, n: Option<usize>) -> Result<Bytes, CacheError> {
        let remaining = self.length.saturating_sub(self.position);
        let want = match n {
            Some(n) => (n as u64).min(remaining),
            None => remaining,
        };
        if want == 0 {
            return Ok(Bytes::new());
        }

        let start = self.position;
        let end = start + want;

        if start < self.buffer_start || end > self.buffer_end() {
            let window = want.max(self.read_ahead as u64);
            let window_end = (start + window).min(self.length);
            let fetched = self.reader.read_range(start, window_end - 1)?;
            if fetched.len() as u64 != window_end - start {
                return Err(CacheError::RangeFetch {
                    url: self.reader.url().to_string(),
                    start,
                    end: window_end - 1,
                    reason: format!(
                        "expected {} bytes, got {}",
                        window_end - start,
                        fetched.len()
                    ),
                });
            }
            self.buffer = fetched;
            self.buffer_start = start;
        }

        let offset = (start - self.buffer_start) as usize;
        let out = self.buffer.slice(offset..offset + want as usize);
        self.position = end;
        Ok(out)
    }
}

impl Read for SeekableRemoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.read_bytes(Some(buf.len())).map_err(io::Error::other)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

impl Seek for SeekableRemoteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.seek_to(target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{MemoryOrigin, Origin, OriginBody, OriginHead};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn stream_over(data: Vec<u8>, read_ahead: usize) -> (Arc<MemoryOrigin>, SeekableRemoteStream) {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("mem://s", data, Some("\"v\""));
        let reader = RangeReader::new(origin.clone(), "mem://s");
        let stream = SeekableRemoteStream::open(reader, read_ahead).unwrap();
        (origin, stream)
    }

    #[test]
    fn reads_inside_window_do_not_refetch() {
        let (origin, mut stream) = stream_over(payload(100), 32);

        assert_eq!(stream.read_bytes(Some(4)).unwrap().len(), 4);
        assert_eq!(stream.read_bytes(Some(8)).unwrap().len(), 8);
        stream.seek_to(20);
        assert_eq!(stream.read_bytes(Some(12)).unwrap().len(), 12);
        assert_eq!(origin.calls().range, 1);

        // Crossing the window end triggers exactly one refill.
        assert_eq!(stream.read_bytes(Some(4)).unwrap().len(), 4);
        assert_eq!(origin.calls().range, 2);
    }

    #[test]
    fn large_reads_fetch_at_least_n_bytes() {
        let data = payload(100);
        let (origin, mut stream) = stream_over(data.clone(), 8);
        let out = stream.read_bytes(Some(50)).unwrap();
        assert_eq!(&out[..], &data[..50]);
        assert_eq!(origin.calls().range, 1);
    }

    #[test]
    fn read_remaining_with_none() {
        let data = payload(40);
        let (_origin, mut stream) = stream_over(data.clone(), 16);
        stream.seek_to(25);
        assert_eq!(&stream.read_bytes(None).unwrap()[..], &data[25..]);
        assert_eq!(stream.tell(), 40);
        assert!(stream.read_bytes(None).unwrap().is_empty());
    }

    #[test]
    fn seek_and_tell_do_no_io() {
        let (origin, mut stream) = stream_over(payload(10), 4);
        stream.seek(SeekFrom::End(-3)).unwrap();
        assert_eq!(stream.tell(), 7);
        stream.seek(SeekFrom::Current(-2)).unwrap();
        assert_eq!(stream.tell(), 5);
        assert!(stream.seek(SeekFrom::Current(-10)).is_err());
        assert_eq!(origin.calls().range, 0);
    }

    #[test]
    fn reads_past_end_are_empty() {
        let (_origin, mut stream) = stream_over(payload(10), 4);
        stream.seek_to(50);
        assert!(stream.read_bytes(Some(5)).unwrap().is_empty());
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn window_is_clamped_to_length() {
        let data = payload(10);
        let (_origin, mut stream) = stream_over(data.clone(), 1024);
        stream.seek_to(6);
        assert_eq!(&stream.read_bytes(Some(100)).unwrap()[..], &data[6..]);
    }

    struct SizelessOrigin;

    impl Origin for SizelessOrigin {
        fn name(&self) -> &str {
            "sizeless"
        }
        fn head(&self, _url: &str) -> Result<OriginHead, CacheError> {
            Ok(OriginHead {
                accept_ranges: true,
                ..OriginHead::default()
            })
        }
        fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, CacheError> {
            Err(CacheError::RangeFetch {
                url: url.to_string(),
                start,
                end,
                reason: "unreachable".into(),
            })
        }
        fn get(&self, url: &str) -> Result<OriginBody, CacheError> {
            Err(CacheError::Download {
                url: url.to_string(),
                reason: "unreachable".into(),
            })
        }
    }

    #[test]
    fn open_fails_without_size() {
        let reader = RangeReader::new(Arc::new(SizelessOrigin), "mem://x");
        let err = SeekableRemoteStream::open(reader, 16).err().unwrap();
        assert!(matches!(err, CacheError::SizeUnavailable { .. }));
    }

    proptest! {
        /// Small reads from arbitrary seek positions reproduce the resource
        /// byte for byte, across any number of window refills.
        #[test]
        fn chunked_reads_match_whole_resource(
            len in 1usize..600,
            read_ahead in 1usize..128,
            chunk in 1usize..24,
            start_frac in 0.0f64..1.0,
        ) {
            let data = payload(len);
            let (_origin, mut stream) = stream_over(data.clone(), read_ahead);
            let start = ((len as f64) * start_frac) as u64;
            stream.seek(SeekFrom::Start(start)).unwrap();

            let mut out = Vec::new();
            loop {
                let piece = stream.read_bytes(Some(chunk)).unwrap();
                if piece.is_empty() {
                    break;
                }
                out.extend_from_slice(&piece);
            }
            prop_assert_eq!(&out[..], &data[start as usize..]);
        }
    }

    #[test]
    fn seven_byte_reads_across_refills() {
        let data = payload(257);
        let (_origin, mut stream) = stream_over(data.clone(), 20);
        for start in [0u64, 13, 19, 20, 21, 100, 250] {
            stream.seek_to(start);
            let mut out = Vec::new();
            let mut buf = [0u8; 7];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            assert_eq!(&out[..], &data[start as usize..], "start {start}");
        }
    }
}
