//! Incremental checksum verification over a byte stream, so a 40 GB file
//! never needs to be buffered before corruption is detected.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use discog_types::ContentHash;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::ChecksumMismatch;

/// Wraps an [`AsyncRead`] of the *compressed* bytes as they arrive over the
/// wire, hashing them incrementally. When the inner reader reaches EOF, the
/// accumulated digest is compared against `expected`; a mismatch is
/// delivered as the final `poll_read`'s error instead of a clean EOF.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    expected: ContentHash,
    checked: bool,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R, expected: ContentHash) -> Self {
        Self { inner, hasher: Sha256::new(), expected, checked: false }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = &poll {
            let after = buf.filled().len();
            if after > before {
                this.hasher.update(&buf.filled()[before..after]);
            } else if !this.checked {
                // EOF: no bytes were appended by this call.
                this.checked = true;
                let actual: ContentHash = this.hasher.clone().finalize().into();
                if actual != this.expected {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        ChecksumMismatch::new(this.expected, actual),
                    )));
                }
            }
        }

        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discog_types::content_hash;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn passes_through_bytes_and_accepts_matching_checksum() {
        let data = b"the quick brown fox".to_vec();
        let expected = content_hash(&data);
        let mut reader = HashingReader::new(data.as_slice(), expected);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn surfaces_mismatch_at_eof() {
        let data = b"the quick brown fox".to_vec();
        let wrong_expected = content_hash(b"something else");
        let mut reader = HashingReader::new(data.as_slice(), wrong_expected);
        let mut out = Vec::new();
        let result = reader.read_to_end(&mut out).await;
        assert!(result.is_err());
        // The bytes that arrived before EOF were still delivered.
        assert_eq!(out, data);
    }
}
