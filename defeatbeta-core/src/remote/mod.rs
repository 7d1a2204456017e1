//! Partial reads of remote files over HTTP range requests.

pub mod chunk;
pub mod range;
pub mod stream;

pub use chunk::RemoteChunkReader;
pub use range::RangeReader;
pub use stream::SeekableRemoteStream;
