// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::param::{reason_phrase, CRLF, HTTP_1_1, SERVER_NAME};

use chrono::prelude::*;
use log::warn;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use std::io;

/// 响应状态行与标头。
///
/// 标头是有序的多值表：`add_header` 追加一个值，`set_header` 与各个便捷方法覆盖已有的值。
/// 字段名匹配大小写不敏感，序列化时保留第一次写入的拼写。
#[derive(Debug, Clone)]
pub struct Response {
    version: String,
    status_code: u16,
    information: String,
    headers: Vec<(String, Vec<String>)>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HTTP_1_1.to_string(),
            status_code: 200,
            information: "OK".to_string(),
            headers: vec![("Server".to_string(), vec![SERVER_NAME.to_string()])],
        }
    }

    /// 设置状态码，原因短语从状态码表中查找。
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        let information = match reason_phrase(code) {
            Some(phrase) => phrase,
            None => {
                warn!("未知的状态码：{}", code);
                "Unknown"
            }
        };
        self.set_status_line(code, information)
    }

    /// 同时设置状态码与自定义的原因短语。
    pub fn set_status_line(&mut self, code: u16, information: &str) -> &mut Self {
        self.status_code = code;
        self.information = information.to_string();
        self
    }

    pub fn set_version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    /// 追加一个值，不影响同名标头已有的值。
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        match self.position(name) {
            Some(index) => self.headers[index].1.push(value.to_string()),
            None => self
                .headers
                .push((name.to_string(), vec![value.to_string()])),
        }
        self
    }

    /// 覆盖同名标头的全部值。
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match self.position(name) {
            Some(index) => self.headers[index].1 = vec![value.to_string()],
            None => self
                .headers
                .push((name.to_string(), vec![value.to_string()])),
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Vec<String>> {
        let index = self.position(name)?;
        Some(self.headers.remove(index).1)
    }

    /// 同名标头的全部值。
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|index| self.headers[index].1.as_slice())
    }

    pub fn set_content_length(&mut self, length: u64) -> &mut Self {
        self.set_header("Content-Length", &length.to_string())
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.set_header("Content-Type", content_type)
    }

    /// 允许跨域访问，`origin` 为 `*` 或具体的源。
    pub fn allow_cors(&mut self, origin: &str) -> &mut Self {
        self.set_header("Access-Control-Allow-Origin", origin)
            .set_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .set_header("Access-Control-Allow-Headers", "Content-Type")
    }

    pub fn set_date(&mut self) -> &mut Self {
        let date = format_date(&Utc::now());
        self.set_header("Date", &date)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// 序列化状态行与标头，以空行结尾。
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = [
            self.version.as_str(),
            " ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
        ]
        .concat();
        for (name, values) in &self.headers {
            for value in values {
                head.push_str(&[name.as_str(), ": ", value, CRLF].concat());
            }
        }
        head.push_str(CRLF);
        head.into_bytes()
    }

    /// 写出状态行与标头并刷新。
    pub async fn write_head<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        out.write_all(&self.head_bytes()).await?;
        out.flush().await
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

/// RFC 7231 IMF-fixdate，例如 `Sun, 06 Nov 1994 08:49:37 GMT`。
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
