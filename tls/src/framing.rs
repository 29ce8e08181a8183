//! Base64-over-TCP framing (spec.md §4.1 "Wire framing"): outbound TLS
//! bytes are base64-encoded, newline-delimited, before hitting the raw
//! socket; inbound bytes are decoded the same way before being handed to
//! the TLS record processor. This is legacy-compatibility wrapping, not
//! a security boundary — it sits strictly below rustls.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wraps any `AsyncRead + AsyncWrite` byte stream (normally a `TcpStream`)
/// so that writes are base64-line-encoded and reads are base64-line-decoded,
/// transparently to whatever sits on top (rustls, in this crate's case).
pub struct Base64Framed<S> {
    inner: S,
    write_buf: BytesMut,
    read_raw: BytesMut,
    read_ready: BytesMut,
}

impl<S> Base64Framed<S> {
    /// Wrap `inner` in base64-line framing.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            write_buf: BytesMut::new(),
            read_raw: BytesMut::new(),
            read_ready: BytesMut::new(),
        }
    }

    /// Unwrap back to the underlying stream. Only meaningful once no
    /// partially-buffered data remains, which callers ensure by calling
    /// this only after `destroy()`.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> Base64Framed<S> {
    /// Drain `write_buf` into the underlying stream as far as it will go
    /// without blocking. Returns `Ready(Ok(()))` once `write_buf` is empty.
    fn drain_write_buf(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.write_buf.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.write_buf) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write zero bytes to base64-framed stream",
                    )))
                }
                Poll::Ready(Ok(n)) => self.write_buf.advance(n),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Base64Framed<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.write_buf.is_empty() {
            match this.drain_write_buf(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        let mut line = BASE64.encode(buf).into_bytes();
        line.push(b'\n');
        this.write_buf.extend_from_slice(&line);
        match this.drain_write_buf(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.drain_write_buf(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.drain_write_buf(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Base64Framed<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_ready.is_empty() {
                let n = std::cmp::min(buf.remaining(), this.read_ready.len());
                buf.put_slice(&this.read_ready[..n]);
                this.read_ready.advance(n);
                return Poll::Ready(Ok(()));
            }

            if let Some(pos) = this.read_raw.iter().position(|&b| b == b'\n') {
                let mut line = this.read_raw.split_to(pos);
                this.read_raw.advance(1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                if line.is_empty() {
                    continue;
                }
                let decoded = BASE64
                    .decode(&line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                this.read_ready.extend_from_slice(&decoded);
                continue;
            }

            let mut tmp = [0u8; 8192];
            let mut tmp_buf = ReadBuf::new(&mut tmp);
            match Pin::new(&mut this.inner).poll_read(cx, &mut tmp_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = tmp_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    this.read_raw.extend_from_slice(filled);
                    continue;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn round_trips_arbitrary_bytes_through_a_loopback_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut framed = Base64Framed::new(sock);
            let mut buf = vec![0u8; 5];
            framed.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            framed.write_all(b"world!").await.unwrap();
            framed.flush().await.unwrap();
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let mut framed = Base64Framed::new(client);
        framed.write_all(b"hello").await.unwrap();
        framed.flush().await.unwrap();

        let mut buf = vec![0u8; 6];
        framed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        server.await.unwrap();
    }
}
