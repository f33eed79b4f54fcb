// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求数据模块
//!
//! 该模块负责：
//! 1. 请求行（Request-Line）的切分：方法、目标、版本。
//! 2. 路径的规范化与校验（拒绝 `..`、反斜杠、控制字符）。
//! 3. 查询字符串展开为参数树。
//! 4. 保存标头、请求体分段等由后续阶段填充的数据。

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::{
    exception::FormatError,
    headers::HeaderMap,
    param::MIN_REQUEST_LINE,
    post::Post,
    query::parse_query,
};

/// 请求行切分后的三个部分。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: &'a str,
}

/// 按第一个和最后一个空格切分 `METHOD SP TARGET SP VERSION`。
///
/// 目标中间允许出现空格。
pub fn parse_request_line(line: &str) -> Result<RequestLine<'_>, FormatError> {
    if line.len() < MIN_REQUEST_LINE {
        return Err(FormatError::RequestLineTooShort);
    }
    let first = line.find(' ').ok_or(FormatError::MalformedRequestLine)?;
    let last = line.rfind(' ').ok_or(FormatError::MalformedRequestLine)?;
    if first == last {
        return Err(FormatError::MalformedRequestLine);
    }
    let method = &line[..first];
    let target = &line[first + 1..last];
    let version = &line[last + 1..];
    if method.is_empty() || version.is_empty() {
        return Err(FormatError::MalformedRequestLine);
    }
    Ok(RequestLine {
        method,
        target,
        version,
    })
}

/// 规范化请求路径。
///
/// 合并连续的 `/` 与 `\`，百分号解码，去掉空段与 `.` 段，结果总以 `/` 开头。
/// 解码后仍含 `..` 段、`\`、`%` 或控制字符的路径一律拒绝。
pub fn normalize_path(raw: &str) -> Result<String, FormatError> {
    let collapsed: String = raw
        .split(|c| c == '/' || c == '\\')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let decoded = urlencoding::decode(&collapsed).map_err(|_| FormatError::InvalidPath)?;
    if decoded
        .chars()
        .any(|c| c == '\\' || c == '%' || c.is_control())
    {
        return Err(FormatError::InvalidPath);
    }

    let mut normalized = String::with_capacity(decoded.len() + 1);
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(FormatError::InvalidPath),
            _ => {
                normalized.push('/');
                normalized.push_str(segment);
            }
        }
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// 一个请求的全部解析结果，由所属连接独占。
#[derive(Debug, Default)]
pub struct Request {
    method: String,
    path: String,
    target: String,
    query_string: Option<String>,
    version: String,
    headers: HeaderMap,
    query: Value,
    parts: HashMap<String, Option<Post>>,
    content_type: Option<String>,
    charset: Option<String>,
    boundary: Option<Vec<u8>>,
    content_length: Option<u64>,
}

impl Request {
    /// 解析请求行：切分、规范化路径、展开查询参数。
    pub fn from_request_line(line: &str) -> Result<Self, FormatError> {
        let RequestLine {
            method,
            target,
            version,
        } = parse_request_line(line)?;

        let (raw_path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = normalize_path(raw_path)?;

        let mut query = Value::Object(Map::new());
        if let Some(qs) = &query_string {
            parse_query(qs, &mut query);
        }

        Ok(Self {
            method: method.to_string(),
            path,
            target: target.to_string(),
            query_string,
            version: version.to_string(),
            query,
            ..Self::default()
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// 规范化后的路径（不含查询字符串）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 请求行中原样的目标
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn user_agent(&self) -> &str {
        self.headers.get("user-agent").unwrap_or("")
    }

    /// 查询参数树，总是一个 JSON 对象
    pub fn query(&self) -> &Value {
        &self.query
    }

    pub fn parts(&self) -> &HashMap<String, Option<Post>> {
        &self.parts
    }

    /// 按名字取出有值的分段。
    pub fn part(&self, name: &str) -> Option<&Post> {
        self.parts.get(name).and_then(Option::as_ref)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// 完整的分隔符字节：`CRLF "--" boundary`
    pub fn boundary(&self) -> Option<&[u8]> {
        self.boundary.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub(crate) fn parts_mut(&mut self) -> &mut HashMap<String, Option<Post>> {
        &mut self.parts
    }

    pub(crate) fn set_content_type(&mut self, content_type: String) {
        self.content_type = Some(content_type);
    }

    pub(crate) fn set_charset(&mut self, charset: String) {
        self.charset = Some(charset);
    }

    pub(crate) fn set_boundary(&mut self, boundary: Vec<u8>) {
        self.boundary = Some(boundary);
    }

    pub(crate) fn set_content_length(&mut self, length: u64) {
        self.content_length = Some(length);
    }

    /// 删除所有溢出分段的临时文件，返回删除的个数。
    pub(crate) fn remove_parts(&mut self) -> usize {
        let mut removed = 0;
        for post in self.parts.values_mut().flatten() {
            if post.path().is_some() {
                post.remove();
                removed += 1;
            }
        }
        removed
    }
}
