// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 定义协议引擎遵循的 HTTP/1.1 常量与各项长度上限：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 请求行、标头块、boundary 的长度限制。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "formwire";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 默认协议版本
pub const HTTP_1_1: &str = "HTTP/1.1";

/// 请求行的最小长度（字节）
pub const MIN_REQUEST_LINE: usize = 5;

/// 请求行的最大长度（字节），超出返回 414
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

/// 整个标头块的最大长度（字节），超出返回 431
pub const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// multipart 分段标头块的最大长度（字节）
pub const MAX_PART_HEADER_BLOCK: usize = 8 * 1024;

/// RFC 2046 规定的 boundary 最大长度
pub const MAX_BOUNDARY_LENGTH: usize = 70;

/// Content-Length 的上限，超出返回 413
pub const MAX_CONTENT_LENGTH: u64 = isize::MAX as u64;

/// 连接输入/输出缓冲区大小
pub const IO_BUFFER_SIZE: usize = 8 * 1024;

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        // 2xx
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");
        map.insert(206, "Partial Content");

        // 3xx
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(411, "Length Required");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(422, "Unprocessable Content");
        map.insert(431, "Request Header Fields Too Large");

        // 5xx
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 查找状态码的原因短语，未知状态码返回 `None`。
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    STATUS_CODES.get(&code).copied()
}
