//! Streaming helpers shared by the writers and readers.
//!
//! Writers accept runtime-agnostic [`futures::io::AsyncRead`] input; readers
//! hand back a [`Stream`] of byte chunks that callers can consume directly or
//! turn back into an `AsyncRead` with [`into_async_read`].

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::io::{AsyncRead, AsyncReadExt};
use futures::{Stream, TryStreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Content supplied by a caller for a source or extraction write.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;
/// Content handed back by a read: ordered, single-pass, not seekable.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// What a single streaming write produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Written {
    pub bytes: u64,
    /// SHA-256, lowercase hex.
    pub hash: String,
}

/// Copy `reader` into a new file at `path`, hashing and counting in the same
/// pass. The content is never re-read.
///
/// Any failure of the caller's stream is a [`Stream`](ErrorKind::Stream)
/// error. The partially written file is left for the caller to clean up.
pub(crate) async fn stream_to_file<R: AsyncRead + Unpin + ?Sized>(reader: &mut R, path: &Path) -> Result<Written> {
    let mut file = fs::File::create(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let read = reader.read(&mut buffer).await.or_raise(|| ErrorKind::Stream)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        file.write_all(&buffer[..read]).await.map_err(|e| ErrorKind::from_io(e, path))?;
        bytes += read as u64;
    }
    file.sync_all().await.map_err(|e| ErrorKind::from_io(e, path))?;
    Ok(Written {
        bytes,
        hash: format!("{:x}", hasher.finalize()),
    })
}

/// Open `path` for a streaming read. Fails eagerly if it cannot be opened.
pub(crate) async fn open(path: &Path) -> Result<fs::File> {
    let file = fs::File::open(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    let metadata = file.metadata().await.map_err(|e| ErrorKind::from_io(e, path))?;
    if !metadata.is_file() {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    Ok(file)
}

/// Chunks of an already opened file. Read errors are logged, then yielded,
/// and end the stream.
pub(crate) fn file_chunks(mut file: fs::File, path: PathBuf) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
    stream! {
        loop {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            match file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => {
                    chunk.truncate(read);
                    yield Ok(chunk);
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Read stream failed");
                    yield Err::<Vec<u8>, _>(e).or_raise(|| ErrorKind::Stream);
                    break;
                },
            }
        }
    }
}

/// Concatenate files into one continuous stream, opening each lazily in order.
pub(crate) fn concat_files(paths: Vec<PathBuf>) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
    stream! {
        for path in paths {
            let file = match open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Could not open part of a concatenated stream");
                    yield Err(e);
                    return;
                },
            };
            for await chunk in file_chunks(file, path) {
                let failed = chunk.is_err();
                yield chunk;
                if failed {
                    return;
                }
            }
        }
    }
}

/// Adapt a [`ContentStream`] into an [`AsyncRead`], e.g. to copy it somewhere.
pub fn into_async_read(stream: ContentStream) -> impl AsyncRead + Send + Unpin {
    stream.map_err(|e| std::io::Error::other(e.to_string())).into_async_read()
}

/// Drain a [`ContentStream`] into memory.
pub async fn collect(mut stream: ContentStream) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    while let Some(chunk) = stream.try_next().await? {
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    /// Yields some bytes, then fails.
    struct Broken(usize);
    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut [u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if self.0 == 0 {
                return std::task::Poll::Ready(Err(std::io::Error::other("connection reset")));
            }
            let n = self.0.min(buf.len());
            buf[..n].fill(b'x');
            self.0 -= n;
            std::task::Poll::Ready(Ok(n))
        }
    }

    #[tokio::test]
    async fn test_stream_to_file_hashes_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source");
        let written = stream_to_file(&mut Cursor::new(b"abc".to_vec()), &path).await.unwrap();
        assert_eq!(written.bytes, 3);
        // SHA-256("abc")
        assert_eq!(written.hash, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(fs::read(&path).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_stream_to_file_reports_stream_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = stream_to_file(&mut Broken(10), &dir.path().join("source")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Stream));
    }

    #[tokio::test]
    async fn test_concat_files_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (name, content) in [("b", "second"), ("a", "first-"), ("c", "-third")] {
            let path = dir.path().join(name);
            fs::write(&path, content).await.unwrap();
            paths.push(path);
        }
        let stream: ContentStream = Box::pin(concat_files(paths));
        assert_eq!(collect(stream).await.unwrap(), b"secondfirst--third");
    }

    #[tokio::test]
    async fn test_concat_files_missing_part_errors() {
        let dir = tempfile::tempdir().unwrap();
        let stream: ContentStream = Box::pin(concat_files(vec![dir.path().join("missing")]));
        let err = collect(stream).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_into_async_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        fs::write(&path, b"hello").await.unwrap();
        let stream: ContentStream = Box::pin(file_chunks(open(&path).await.unwrap(), path));
        let mut reader = into_async_read(stream);
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello");
    }
}
