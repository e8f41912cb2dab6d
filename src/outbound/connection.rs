//! Lifetime-bounded connections.
//!
//! A [`PooledConnection`] remembers when it was dialed. Once older than its
//! maximum lifetime, every read, write or flush fails with
//! [`ConnectionExpired`] without touching the socket, so the pool discards it
//! and the next request dials fresh (picking up DNS or load-balancer changes).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use tokio::time::Instant;

/// The connection outlived its maximum lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection expired after {age:?} (max lifetime {max_lifetime:?})")]
pub struct ConnectionExpired {
    pub age: Duration,
    pub max_lifetime: Duration,
}

#[derive(Debug)]
pub struct PooledConnection<T> {
    inner: T,
    created_at: Instant,
    max_lifetime: Duration,
}

impl<T> PooledConnection<T> {
    pub fn new(inner: T, max_lifetime: Duration) -> Self {
        Self {
            inner,
            created_at: Instant::now(),
            max_lifetime,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= self.max_lifetime
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn check_expired(&self) -> io::Result<()> {
        let age = self.age();
        if age >= self.max_lifetime {
            return Err(io::Error::other(ConnectionExpired {
                age,
                max_lifetime: self.max_lifetime,
            }));
        }
        Ok(())
    }
}

impl<T: Read + Unpin> Read for PooledConnection<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_expired() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: Write + Unpin> Write for PooledConnection<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_expired() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_expired() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    // Closing an expired connection must still work.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_expired() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write_vectored(cx, bufs)
    }
}

impl<T: Connection> Connection for PooledConnection<T> {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}
