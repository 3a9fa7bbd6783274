//! Incremental cipher transforms over byte streams
//!
//! A [`CipherStream`] wraps an inner byte stream and applies a stateful
//! ChaCha20 keystream to every chunk as it passes through. Because the
//! transform is a pure XOR keystream, the same type serves encryption and
//! decryption, and chunk boundaries never corrupt the cipher state: the
//! concatenated output equals a one-shot transform of the concatenated input.
//!
//! The transform is pull-based: a chunk is only read from the inner stream
//! (and transformed) when the downstream consumer polls, so flow control from
//! a slow reader propagates naturally back to the producer - no decrypted or
//! encrypted chunks pile up in memory. Dropping the stream abandons any
//! in-flight transform and releases the inner stream (and with it, an
//! upstream connection).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chacha20::cipher::StreamCipher;
use chacha20::ChaCha20;
use futures::Stream;

use sdk::SessionKey;

/// A byte stream with a ChaCha20 keystream applied chunk-by-chunk
pub struct CipherStream<S> {
    inner: S,
    cipher: ChaCha20,
}

impl<S> CipherStream<S> {
    /// Wrap `inner`, starting the keystream at offset 0
    pub fn new(inner: S, session: &SessionKey) -> Self {
        Self {
            inner,
            cipher: session.cipher(),
        }
    }
}

impl<S, E> Stream for CipherStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                // chunks are transformed strictly in arrival order; the
                // keystream position advances with every chunk
                let mut buff = chunk.to_vec();
                this.cipher.apply_keystream(&mut buff);
                Poll::Ready(Some(Ok(Bytes::from(buff))))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
