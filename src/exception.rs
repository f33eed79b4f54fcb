// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了协议引擎在一次连接的生命周期中可能产生的各类异常。
//!
//! ## 分类
//! - **FormatError**：请求报文本身不合法（请求行、标头、边界、Content-Length 等），
//!   总是中止当前解析阶段。每个变体都映射到一个 HTTP 状态码。
//! - **Io**：套接字读写失败。若发生在结构化读取的中途，会被转换为
//!   `FormatError::Corrupted`。
//! - **Timeout**：读写停滞超过空闲时限，或请求头没有按时到达。
//! - **Handler**：业务处理器自身报告的错误。
//!
//! 临时文件的创建/删除失败属于资源错误，只记录日志，不会以 `Exception` 的形式上抛。

use log::debug;
use std::{fmt, io};

/// 请求格式错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// 请求行短于 5 字节。
    RequestLineTooShort,
    /// 请求行超过长度上限。对应 `414 URI Too Long`。
    RequestLineTooLong,
    /// 请求行缺少空格分隔，或首尾空格重合。
    MalformedRequestLine,
    /// 路径包含 `..` 段、反斜杠、控制字符或二次编码。
    InvalidPath,
    /// 标头行没有 `:` 或字段名为空。
    MalformedHeader,
    /// 标头块超过长度上限。对应 `431`。
    HeadersTooLarge,
    /// 流在结构化读取的中途被截断或关闭。
    Corrupted,
    /// Content-Length 缺失、为负或不是数字。对应 `411 Length Required`。
    LengthRequired,
    /// 请求体超出允许的大小。对应 `413 Content Too Large`。
    PayloadTooLarge,
    /// multipart 类型缺少 boundary 参数。
    MissingBoundary,
    /// boundary 为空、超过 70 字节、含非 ASCII 或控制字符。
    InvalidBoundary,
    /// 请求体开头与 `--boundary CRLF` 不匹配。
    BoundaryMismatch,
    /// 分段缺少 Content-Disposition 标头。
    MissingContentDisposition,
    /// Content-Disposition 不是 `form-data`，或缺少 `name` 参数。
    InvalidContentDisposition,
    /// multipart 请求体没有以结束边界收尾。
    UnterminatedMultipart,
}

impl FormatError {
    /// 该错误对应的 HTTP 状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            FormatError::RequestLineTooLong => 414,
            FormatError::HeadersTooLarge => 431,
            FormatError::LengthRequired => 411,
            FormatError::PayloadTooLarge => 413,
            _ => 400,
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FormatError::*;
        match self {
            RequestLineTooShort => write!(f, "Request line is shorter than 5 bytes"),
            RequestLineTooLong => write!(f, "Request line is too long"),
            MalformedRequestLine => write!(f, "Malformed request line"),
            InvalidPath => write!(f, "Invalid request path"),
            MalformedHeader => write!(f, "Malformed header line"),
            HeadersTooLarge => write!(f, "Header block is too large"),
            Corrupted => write!(f, "Stream corrupted or closed before the message finished"),
            LengthRequired => write!(f, "Missing or invalid Content-Length"),
            PayloadTooLarge => write!(f, "Request body is too large"),
            MissingBoundary => write!(f, "Multipart content type has no boundary"),
            InvalidBoundary => write!(f, "Invalid multipart boundary"),
            BoundaryMismatch => write!(f, "Multipart body does not start with its boundary"),
            MissingContentDisposition => write!(f, "Multipart part has no Content-Disposition"),
            InvalidContentDisposition => write!(f, "Invalid Content-Disposition"),
            UnterminatedMultipart => write!(f, "Multipart body did not end properly"),
        }
    }
}

impl std::error::Error for FormatError {}

/// 连接生命周期中的异常。
#[derive(Debug)]
pub enum Exception {
    Format(FormatError),
    Io(io::Error),
    /// 读写停滞超过空闲时限，或请求头没有在整体时限内到达。
    Timeout,
    /// 业务处理器报告的错误。
    Handler(String),
}

impl Exception {
    /// 结构化读取（请求行、标头、multipart 分帧）被 IO 错误打断时使用。
    pub fn structural(err: io::Error) -> Self {
        debug!("结构化读取被中断：{}", err);
        match err.kind() {
            io::ErrorKind::TimedOut => Exception::Timeout,
            _ => Exception::Format(FormatError::Corrupted),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Exception::Handler(message.into())
    }

    /// 用于错误页面的状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            Exception::Format(e) => e.status_code(),
            Exception::Timeout => 408,
            Exception::Io(_) | Exception::Handler(_) => 500,
        }
    }

    pub fn format_error(&self) -> Option<FormatError> {
        match self {
            Exception::Format(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::Format(e) => write!(f, "{}", e),
            Exception::Io(e) => write!(f, "IO error: {}", e),
            Exception::Timeout => write!(f, "Connection timed out"),
            Exception::Handler(msg) => write!(f, "Handler error: {}", msg),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Exception::Format(e) => Some(e),
            Exception::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Exception {
    fn from(err: FormatError) -> Self {
        Exception::Format(err)
    }
}

impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Exception::Timeout,
            _ => Exception::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_status_codes() {
        assert_eq!(FormatError::LengthRequired.status_code(), 411);
        assert_eq!(FormatError::PayloadTooLarge.status_code(), 413);
        assert_eq!(FormatError::RequestLineTooLong.status_code(), 414);
        assert_eq!(FormatError::HeadersTooLarge.status_code(), 431);
        assert_eq!(FormatError::InvalidPath.status_code(), 400);
        assert_eq!(FormatError::BoundaryMismatch.status_code(), 400);
    }

    #[test]
    fn test_structural_io_error_becomes_corrupted() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let exception = Exception::structural(err);
        assert_eq!(exception.format_error(), Some(FormatError::Corrupted));
        assert_eq!(exception.status_code(), 400);
    }

    #[test]
    fn test_structural_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert!(matches!(Exception::structural(err), Exception::Timeout));
        assert_eq!(Exception::Timeout.status_code(), 408);
    }

    #[test]
    fn test_stalled_write_is_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "stalled");
        assert!(matches!(Exception::from(err), Exception::Timeout));
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(Exception::from(err), Exception::Io(_)));
    }

    #[test]
    fn test_display() {
        let exception: Exception = FormatError::Corrupted.into();
        assert!(exception.to_string().contains("corrupted or closed"));
        assert_eq!(
            Exception::handler("boom").to_string(),
            "Handler error: boom"
        );
    }
}
