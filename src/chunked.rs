// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 分块传输编码
//!
//! 每次 `write` 产生一个 `hex-size CRLF data CRLF` 的分块。
//! 也可以用 `start_chunk` / `write_chunk` / `finish_chunk` 手动拼装一个分块，
//! 便于把来自不同缓冲区的数据直接写进同一个分块里。
//! `close` 写出终止分块 `0 CRLF CRLF`。

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::param::CRLF;

const TERMINATOR: &[u8] = b"0\r\n\r\n";

#[derive(Debug)]
pub struct ChunkedEncoder<W> {
    inner: W,
    /// 手动分块中还需写入的字节数，`None` 表示当前不在手动分块中
    remaining: Option<u64>,
    closed: bool,
}

impl<W> ChunkedEncoder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            remaining: None,
            closed: false,
        }
    }

    /// 写出一个完整的分块。空数据不产生分块，否则会被当成终止分块。
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.start_chunk(data.len() as u64).await?;
        self.write_chunk(data).await?;
        self.finish_chunk().await
    }

    /// 只写出分块长度行。
    pub async fn start_chunk(&mut self, len: u64) -> io::Result<()> {
        self.check_open()?;
        if self.remaining.is_some() {
            return Err(invalid("previous chunk is not finished"));
        }
        if len == 0 {
            return Err(invalid("chunk length must be positive"));
        }
        self.inner
            .write_all(format!("{:x}{}", len, CRLF).as_bytes())
            .await?;
        self.remaining = Some(len);
        Ok(())
    }

    /// 写入手动分块的一部分数据，总量不得超过 `start_chunk` 声明的长度。
    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let remaining = self
            .remaining
            .ok_or_else(|| invalid("no chunk has been started"))?;
        let len = data.len() as u64;
        if len > remaining {
            return Err(invalid("chunk data exceeds the declared length"));
        }
        self.inner.write_all(data).await?;
        self.remaining = Some(remaining - len);
        Ok(())
    }

    /// 结束手动分块，写出结尾的 CRLF。
    pub async fn finish_chunk(&mut self) -> io::Result<()> {
        match self.remaining {
            Some(0) => {
                self.inner.write_all(CRLF.as_bytes()).await?;
                self.remaining = None;
                Ok(())
            }
            Some(left) => Err(invalid(&format!("chunk is missing {} bytes", left))),
            None => Err(invalid("no chunk has been started")),
        }
    }

    /// 写出终止分块并刷新。重复调用没有效果。
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.remaining.is_some() {
            return Err(invalid("cannot close inside an unfinished chunk"));
        }
        self.inner.write_all(TERMINATOR).await?;
        self.inner.flush().await?;
        self.closed = true;
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(invalid("encoder is closed"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}
