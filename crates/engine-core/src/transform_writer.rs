use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::io::AsyncWrite;

/// A length-preserving transformation applied to bytes on their way to disk.
///
/// `offset` is the absolute file position of `input[0]`, so chunks written out
/// of order transform identically to a sequential write.
pub trait ChunkTransform: Send + Sync {
    fn apply(&self, offset: u64, input: &[u8]) -> Vec<u8>;

    /// Recovers the original bytes from output of [`ChunkTransform::apply`]
    /// at the same offset.
    fn reverse(&self, offset: u64, input: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl ChunkTransform for Identity {
    fn apply(&self, _offset: u64, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }

    fn reverse(&self, _offset: u64, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }
}

/// Repeating-key XOR keyed by absolute position. Its own inverse.
#[derive(Debug, Clone)]
pub struct XorKeystream {
    key: Vec<u8>,
}

impl XorKeystream {
    /// Returns `None` for an empty key.
    pub fn new(key: impl Into<Vec<u8>>) -> Option<Self> {
        let key = key.into();
        (!key.is_empty()).then_some(Self { key })
    }
}

impl ChunkTransform for XorKeystream {
    fn apply(&self, offset: u64, input: &[u8]) -> Vec<u8> {
        let len = self.key.len() as u64;
        input
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ self.key[((offset + i as u64) % len) as usize])
            .collect()
    }

    fn reverse(&self, offset: u64, input: &[u8]) -> Vec<u8> {
        self.apply(offset, input)
    }
}

impl<T: ChunkTransform + ?Sized> ChunkTransform for Arc<T> {
    fn apply(&self, offset: u64, input: &[u8]) -> Vec<u8> {
        (**self).apply(offset, input)
    }

    fn reverse(&self, offset: u64, input: &[u8]) -> Vec<u8> {
        (**self).reverse(offset, input)
    }
}

/// [`AsyncWrite`] decorator running every buffer through a [`ChunkTransform`]
/// before it reaches the inner sink.
///
/// A write is accepted whole once transformed; bytes the sink has not taken
/// yet stay pending and are drained before the next write, flush or shutdown.
pub struct TransformWriter<W, T> {
    inner: W,
    transform: T,
    offset: u64,
    pending: Vec<u8>,
    written: usize,
}

impl<W, T> TransformWriter<W, T>
where
    W: AsyncWrite + Unpin,
    T: ChunkTransform + Unpin,
{
    /// `start_offset` is the absolute position of the first byte written.
    pub fn new(inner: W, transform: T, start_offset: u64) -> Self {
        Self {
            inner,
            transform,
            offset: start_offset,
            pending: Vec::new(),
            written: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.written < self.pending.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                )));
            }
            self.written += n;
        }
        self.pending.clear();
        self.written = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W, T> AsyncWrite for TransformWriter<W, T>
where
    W: AsyncWrite + Unpin,
    T: ChunkTransform + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.pending = this.transform.apply(this.offset, buf);
        this.offset += buf.len() as u64;

        // Push what the sink takes right away; the rest drains later.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn identity_passes_bytes_through() {
        let mut writer = TransformWriter::new(Vec::new(), Identity, 0);
        writer.write_all(b"hello").await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.offset(), 5);
        assert_eq!(writer.into_inner(), b"hello");
    }

    #[tokio::test]
    async fn xor_is_position_dependent_and_reversible() {
        let key = XorKeystream::new(b"k3y".to_vec()).unwrap();
        let data = b"the quick brown fox".to_vec();

        // Encode in two pieces, the second one starting mid-key.
        let mut writer = TransformWriter::new(Vec::new(), key.clone(), 0);
        writer.write_all(&data[..7]).await.unwrap();
        writer.write_all(&data[7..]).await.unwrap();
        writer.flush().await.unwrap();
        let encoded = writer.into_inner();

        assert_eq!(encoded, key.apply(0, &data));
        assert_ne!(encoded, data);
        assert_eq!(key.apply(0, &encoded), data);
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(XorKeystream::new(Vec::new()).is_none());
    }
}
