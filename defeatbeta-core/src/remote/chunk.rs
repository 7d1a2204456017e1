//! `parquet` `ChunkReader` adapter over a [`SeekableRemoteStream`].
//!
//! The parquet reader asks for the footer and for column chunks by offset;
//! every request goes through the shared stream so its read-ahead window is
//! reused across calls.

use super::stream::SeekableRemoteStream;
use bytes::Bytes;
use parquet::errors::{ParquetError, Result as ParquetResult};
use parquet::file::reader::{ChunkReader, Length};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cheaply cloneable handle to a remote Parquet file.
#[derive(Clone)]
pub struct RemoteChunkReader {
    stream: Arc<Mutex<SeekableRemoteStream>>,
    length: u64,
}

impl RemoteChunkReader {
    pub fn new(stream: SeekableRemoteStream) -> Self {
        let length = stream.len();
        Self {
            stream: Arc::new(Mutex::new(stream)),
            length,
        }
    }

    pub fn etag(&self) -> Option<String> {
        lock(&self.stream).ok().and_then(|s| s.etag())
    }
}

fn lock(
    stream: &Mutex<SeekableRemoteStream>,
) -> Result<MutexGuard<'_, SeekableRemoteStream>, ParquetError> {
    stream
        .lock()
        .map_err(|_| ParquetError::General("remote stream lock poisoned".into()))
}

impl Length for RemoteChunkReader {
    fn len(&self) -> u64 {
        self.length
    }
}

impl ChunkReader for RemoteChunkReader {
    type T = RemoteChunkRead;

    fn get_read(&self, start: u64) -> ParquetResult<Self::T> {
        Ok(RemoteChunkRead {
            stream: Arc::clone(&self.stream),
            position: start,
        })
    }

    fn get_bytes(&self, start: u64, length: usize) -> ParquetResult<Bytes> {
        let mut stream = lock(&self.stream)?;
        stream.seek_to(start);
        let bytes = stream
            .read_bytes(Some(length))
            .map_err(|e| ParquetError::External(Box::new(e)))?;
        if bytes.len() != length {
            return Err(ParquetError::EOF(format!(
                "expected {length} bytes at offset {start}, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

/// Sequential reader starting at a fixed offset of the shared stream.
pub struct RemoteChunkRead {
    stream: Arc<Mutex<SeekableRemoteStream>>,
    position: u64,
}

impl Read for RemoteChunkRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| io::Error::other("remote stream lock poisoned"))?;
        stream.seek_to(self.position);
        let bytes = stream
            .read_bytes(Some(buf.len()))
            .map_err(io::Error::other)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        Ok(bytes.len())
    }
}
