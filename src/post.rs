// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求体分段存储
//!
//! 一个 `Post` 表示请求体中解码出的一段内容：要么是内存缓冲区，要么是溢出到磁盘的临时文件。
//!
//! - 内存状态下，累计字节数一旦超过阈值，就把已有内容写入新建的临时文件并释放内存，
//!   此后的写入全部追加到文件。晋升只发生一次，且只能从内存到磁盘。
//! - 带 `filename` 的上传分段一开始就落盘。
//! - 临时文件无法创建时记录警告，继续留在内存中。
//! - 临时文件由所属的连接在关闭时删除，删除失败只记录日志。

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tempfile::NamedTempFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::headers::HeaderMap;

const TEMP_PREFIX: &str = "formwire-";
const TEMP_SUFFIX: &str = ".part";

#[derive(Debug)]
enum Storage {
    /// 仍在累积的内存缓冲区
    Memory(BytesMut),
    /// 解码完成后冻结的内存内容
    Frozen(Bytes),
    /// 溢出到临时文件
    Spilled { file: NamedTempFile, len: u64 },
    /// 临时文件已被删除
    Removed { len: u64 },
}

#[derive(Debug)]
pub struct Post {
    filename: Option<String>,
    content_type: Option<String>,
    headers: HeaderMap,
    threshold: usize,
    spill_failed: bool,
    storage: Storage,
}

impl Post {
    /// 新建一个内存分段，超过 `threshold` 字节后溢出到磁盘。
    pub fn new(threshold: usize) -> Self {
        Self {
            filename: None,
            content_type: None,
            headers: HeaderMap::new(),
            threshold,
            spill_failed: false,
            storage: Storage::Memory(BytesMut::new()),
        }
    }

    /// 简单表单解码得到的值，直接冻结在内存中。
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            storage: Storage::Frozen(bytes.into()),
            ..Self::new(usize::MAX)
        }
    }

    /// multipart 分段。带文件名的分段直接落盘。
    pub fn for_part(
        filename: Option<String>,
        content_type: Option<String>,
        headers: HeaderMap,
        threshold: usize,
    ) -> Self {
        let mut post = Self {
            filename,
            content_type,
            headers,
            ..Self::new(threshold)
        };
        if post.filename.is_some() {
            post.spill();
        }
        post
    }

    /// 追加内容。
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if let Storage::Memory(buf) = &self.storage {
            if !self.spill_failed && buf.len() + data.len() > self.threshold {
                self.spill();
            }
        }
        match &mut self.storage {
            Storage::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Storage::Spilled { file, len } => {
                file.write_all(data)?;
                *len += data.len() as u64;
                Ok(())
            }
            Storage::Frozen(_) | Storage::Removed { .. } => Err(io::Error::new(
                io::ErrorKind::Other,
                "part is already finished",
            )),
        }
    }

    /// 把内存内容转移到新建的临时文件。失败时保持内存状态。
    fn spill(&mut self) {
        let Storage::Memory(buf) = &self.storage else {
            return;
        };
        let created = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile()
            .and_then(|mut file| {
                file.write_all(buf)?;
                Ok(file)
            });
        match created {
            Ok(file) => {
                debug!("分段溢出到临时文件：{}", file.path().display());
                let len = buf.len() as u64;
                self.storage = Storage::Spilled { file, len };
            }
            Err(e) => {
                warn!("无法创建临时文件，分段将保留在内存中：{}", e);
                self.spill_failed = true;
            }
        }
    }

    /// 结束写入：内存内容冻结为不可变的字节串，临时文件刷盘。
    pub fn finish(&mut self) -> io::Result<()> {
        match &mut self.storage {
            Storage::Memory(buf) => {
                let bytes = std::mem::take(buf).freeze();
                self.storage = Storage::Frozen(bytes);
                Ok(())
            }
            Storage::Spilled { file, .. } => file.flush(),
            _ => Ok(()),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_spilled(&self) -> bool {
        matches!(
            self.storage,
            Storage::Spilled { .. } | Storage::Removed { .. }
        )
    }

    pub fn size(&self) -> u64 {
        match &self.storage {
            Storage::Memory(buf) => buf.len() as u64,
            Storage::Frozen(bytes) => bytes.len() as u64,
            Storage::Spilled { len, .. } | Storage::Removed { len } => *len,
        }
    }

    /// 溢出时的临时文件路径。
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Spilled { file, .. } => Some(file.path()),
            _ => None,
        }
    }

    /// 读出全部内容。
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        match &self.storage {
            Storage::Memory(buf) => Ok(buf.to_vec()),
            Storage::Frozen(bytes) => Ok(bytes.to_vec()),
            Storage::Spilled { file, .. } => fs::read(file.path()),
            Storage::Removed { .. } => Err(removed()),
        }
    }

    pub fn to_string_lossy(&self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(&self.to_vec()?).into_owned())
    }

    /// 把全部内容复制到任意输出，返回写入的字节数。
    pub async fn write_to<W>(&self, sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match &self.storage {
            Storage::Memory(buf) => {
                sink.write_all(buf).await?;
                Ok(buf.len() as u64)
            }
            Storage::Frozen(bytes) => {
                sink.write_all(bytes).await?;
                Ok(bytes.len() as u64)
            }
            Storage::Spilled { file, .. } => {
                let mut source = tokio::fs::File::from_std(file.reopen()?);
                tokio::io::copy(&mut source, sink).await
            }
            Storage::Removed { .. } => Err(removed()),
        }
    }

    /// 删除临时文件（若有）。失败只记录日志。
    pub fn remove(&mut self) {
        let Storage::Spilled { len, .. } = self.storage else {
            return;
        };
        let storage = std::mem::replace(&mut self.storage, Storage::Removed { len });
        if let Storage::Spilled { file, .. } = storage {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!("临时文件已删除：{}", path.display()),
                Err(e) => warn!("删除临时文件{}失败：{}", path.display(), e),
            }
        }
    }
}

fn removed() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "spilled part was already removed")
}
