// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 读写空闲超时
//!
//! 时限约束的是单次读/写操作的停滞时间：只要字节仍在流动，计时器就会在每次
//! 操作完成后重置，慢速但持续的上传与长时间的分块响应都不会被打断。
//! 停滞超过时限的操作以 `io::ErrorKind::TimedOut` 失败。

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{sleep, Sleep},
};

/// 可在连接建立之后调整的空闲时限，单位毫秒，0 表示不限时。
#[derive(Debug, Clone, Default)]
pub struct IdleLimit(Arc<AtomicU64>);

impl IdleLimit {
    pub fn get(&self) -> Option<Duration> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set(&self, limit: Option<Duration>) {
        let ms = match limit {
            Some(limit) => limit.as_millis().clamp(1, u64::MAX as u128) as u64,
            None => 0,
        };
        self.0.store(ms, Ordering::Relaxed);
    }
}

/// 为任意双向流加上读写空闲超时。读与写各自计时，互不影响。
pub struct IdleTimeout<S> {
    inner: S,
    limit: IdleLimit,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl<S> IdleTimeout<S> {
    pub fn new(inner: S, limit: IdleLimit) -> Self {
        Self {
            inner,
            limit,
            read_timer: None,
            write_timer: None,
        }
    }

    pub fn limit(&self) -> &IdleLimit {
        &self.limit
    }
}

/// 底层操作尚未就绪时推进计时器；时限到达时返回超时错误。
fn poll_stalled(
    timer: &mut Option<Pin<Box<Sleep>>>,
    limit: Option<Duration>,
    cx: &mut Context<'_>,
) -> Poll<io::Error> {
    let Some(limit) = limit else {
        *timer = None;
        return Poll::Pending;
    };
    let sleeping = timer.get_or_insert_with(|| Box::pin(sleep(limit)));
    match sleeping.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *timer = None;
            Poll::Ready(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection stalled for too long",
            ))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_stalled(&mut this.read_timer, this.limit.get(), cx).map(Err),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_stalled(&mut this.write_timer, this.limit.get(), cx).map(Err),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_stalled(&mut this.write_timer, this.limit.get(), cx).map(Err),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_stalled(&mut this.write_timer, this.limit.get(), cx).map(Err),
        }
    }
}
