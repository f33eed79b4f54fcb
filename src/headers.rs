// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 标头解析模块
//!
//! 逐行读取 `NAME ":" [SP] VALUE CRLF`，直到空行为止。
//! 请求标头与 multipart 分段标头共用这里的行读取与行解析逻辑。

use std::{borrow::Cow, collections::HashMap};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{
    exception::{Exception, FormatError},
    util::latin1,
};

/// 大小写不敏感、保持插入顺序的标头表。
///
/// 同名标头重复出现时后写入者覆盖前者，但保留第一次出现的位置。
/// `index` 记录小写字段名在 `entries` 中的下标。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

fn fold(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个标头，字段名统一折叠为小写。
    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1 = value.to_string(),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value.to_string()));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let at = *self.index.get(fold(name).as_ref())?;
        Some(self.entries[at].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(fold(name).as_ref())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let at = self.index.remove(fold(name).as_ref())?;
        let (_, value) = self.entries.remove(at);
        for position in self.index.values_mut() {
            if *position > at {
                *position -= 1;
            }
        }
        Some(value)
    }

    /// 以 (小写字段名, 值) 的形式按插入顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 在第一个 `:` 处切开标头行，并去掉值前面可选的一个空格。
pub fn parse_header_line(line: &str) -> Result<(&str, &str), FormatError> {
    let (name, value) = line.split_once(':').ok_or(FormatError::MalformedHeader)?;
    if name.is_empty() || name.contains(|c: char| c == ' ' || c == '\t') {
        return Err(FormatError::MalformedHeader);
    }
    let value = value.strip_prefix(' ').unwrap_or(value);
    Ok((name, value))
}

/// 读取一行（去掉行尾的 CRLF 或单独的 LF）。
///
/// 一个字节都没读到就遇到 EOF 时返回 `None`；行内容超过 `limit` 时返回 `too_long`；
/// 读到部分内容后遇到 EOF 视为报文损坏。
pub async fn read_line_opt<R>(
    reader: &mut R,
    limit: usize,
    too_long: FormatError,
) -> Result<Option<String>, Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    let cap = limit as u64 + 2;
    let read = (&mut *reader)
        .take(cap)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(Exception::structural)?;

    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if read as u64 >= cap {
            return Err(too_long.into());
        }
        return Err(FormatError::Corrupted.into());
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > limit {
        return Err(too_long.into());
    }
    Ok(Some(latin1(&buf)))
}

/// 读取一行，EOF 视为报文损坏。
pub async fn read_line<R>(
    reader: &mut R,
    limit: usize,
    too_long: FormatError,
) -> Result<String, Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    read_line_opt(reader, limit, too_long)
        .await?
        .ok_or(Exception::Format(FormatError::Corrupted))
}

/// 读取标头块直到空行，总长度不得超过 `budget` 字节。
pub async fn read_headers<R>(reader: &mut R, budget: usize) -> Result<HeaderMap, Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut headers = HeaderMap::new();
    let mut remaining = budget;
    loop {
        let line = read_line(reader, remaining, FormatError::HeadersTooLarge).await?;
        if line.is_empty() {
            return Ok(headers);
        }
        remaining = remaining.saturating_sub(line.len() + 2);
        let (name, value) = parse_header_line(&line)?;
        headers.insert(name, value);
    }
}
