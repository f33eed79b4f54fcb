// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求体分发
//!
//! 根据 Content-Type 与 Content-Length 选择：
//! 1. 无请求体（不允许解析、不是 POST）；
//! 2. 简单表单解码（`key=value&...`，整体读入内存）；
//! 3. multipart 流式解码；
//! 4. 推迟（允许请求体但不允许 multipart 时，请求体原样留在连接中交给处理器）。

use std::collections::HashMap;

use log::debug;
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::{
    config::Settings,
    exception::{Exception, FormatError},
    multipart::{self, delimiter_bytes, validate_boundary},
    param::MAX_CONTENT_LENGTH,
    post::Post,
    request::Request,
    util::{decode_form, decode_form_str, split_pairs, split_unquoted, unquote},
};

/// 请求体最终被如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Simple,
    Multipart,
    Deferred,
}

/// 解析 `primary (";" SP? key "=" value)*`。
///
/// 参数名折叠为小写，值去掉首尾空白与外层引号。引号内的 `;` 属于值本身。
/// 没有 `=` 的参数被忽略。
pub fn parse_parameters(value: &str) -> (String, Vec<(String, String)>) {
    let (primary, rest) = match value.split_once(';') {
        Some((primary, rest)) => (primary, rest),
        None => (value, ""),
    };
    let params = split_unquoted(rest, ';')
        .into_iter()
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_ascii_lowercase(), unquote(value).to_string()))
        })
        .collect();
    (primary.trim().to_string(), params)
}

/// 解析 Content-Length。缺失、为负或不是数字返回 411；
/// 全是数字但超出上限（包括 `u64` 溢出）返回 413。
pub fn parse_content_length(raw: Option<&str>) -> Result<u64, FormatError> {
    let digits = raw.map(str::trim).unwrap_or("");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::LengthRequired);
    }
    match digits.parse::<u64>() {
        Ok(length) if length <= MAX_CONTENT_LENGTH => Ok(length),
        _ => Err(FormatError::PayloadTooLarge),
    }
}

/// 按 Settings 与请求头解码请求体，结果写入 `request`。
pub async fn decode_body<R>(
    reader: &mut R,
    request: &mut Request,
    settings: &Settings,
    id: u128,
) -> Result<BodyKind, Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    if !settings.allow_body() || !request.method().eq_ignore_ascii_case("POST") {
        return Ok(BodyKind::None);
    }

    let length = parse_content_length(request.headers().get("content-length"))?;
    request.set_content_length(length);

    let content_type = request.headers().get("content-type").map(str::to_string);
    let Some(content_type) = content_type.filter(|ct| ct.contains(';')) else {
        if let Some(ct) = request.headers().get("content-type").map(str::to_string) {
            request.set_content_type(ct.trim().to_string());
        }
        decode_simple(reader, request, settings, length, id).await?;
        return Ok(BodyKind::Simple);
    };

    let (primary, params) = parse_parameters(&content_type);
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    if let Some(charset) = param("charset") {
        request.set_charset(charset);
    }
    let boundary = param("boundary");
    let is_multipart = primary.to_ascii_lowercase().starts_with("multipart");
    request.set_content_type(primary);

    if !is_multipart {
        decode_simple(reader, request, settings, length, id).await?;
        return Ok(BodyKind::Simple);
    }

    let boundary = boundary.ok_or(FormatError::MissingBoundary)?;
    validate_boundary(&boundary)?;
    request.set_boundary(delimiter_bytes(&boundary));

    if !settings.allow_multipart() {
        debug!("[ID{}]不允许解析multipart，请求体留给处理器", id);
        return Ok(BodyKind::Deferred);
    }

    let mut limited = (&mut *reader).take(length);
    multipart::decode(&mut limited, &boundary, settings, request.parts_mut(), id).await?;
    // 结束边界之后的尾声部分直接丢弃
    let epilogue = tokio::io::copy(&mut limited, &mut tokio::io::sink())
        .await
        .map_err(Exception::structural)?;
    if epilogue > 0 {
        debug!("[ID{}]丢弃multipart尾声{}字节", id, epilogue);
    }
    Ok(BodyKind::Multipart)
}

async fn decode_simple<R>(
    reader: &mut R,
    request: &mut Request,
    settings: &Settings,
    length: u64,
    id: u128,
) -> Result<(), Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    if length > settings.max_simple_body_size() as u64 {
        return Err(FormatError::PayloadTooLarge.into());
    }
    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(Exception::structural)?;
    debug!("[ID{}]简单请求体读取完毕，长度{}", id, length);

    let text = String::from_utf8_lossy(&buffer);
    parse_simple(&text, request.parts_mut());
    Ok(())
}

/// 把 `a=1&b=2&flag` 解码为分段表，没有 `=` 的键值为 `None`。
pub fn parse_simple(text: &str, parts: &mut HashMap<String, Option<Post>>) {
    for (raw_key, raw_value) in split_pairs(text, '&', '=') {
        let key = decode_form_str(raw_key);
        let value = raw_value.map(|v| Post::from_bytes(decode_form(v)));
        parts.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;

    fn post_request(headers: &[(&str, &str)]) -> Request {
        let mut request = Request::from_request_line("POST /u HTTP/1.1").unwrap();
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(k, v);
        }
        request.set_headers(map);
        request
    }

    #[test]
    fn test_parse_parameters() {
        let (primary, params) =
            parse_parameters("multipart/form-data; boundary=\"ABC 123\";CHARSET= utf-8 ;novalue");
        assert_eq!(primary, "multipart/form-data");
        assert_eq!(
            params,
            vec![
                ("boundary".to_string(), "ABC 123".to_string()),
                ("charset".to_string(), "utf-8".to_string()),
            ]
        );

        let (primary, params) =
            parse_parameters(r#"form-data; name="upload"; filename="a;b=c.txt""#);
        assert_eq!(primary, "form-data");
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "upload".to_string()),
                ("filename".to_string(), "a;b=c.txt".to_string()),
            ]
        );

        let (primary, params) = parse_parameters("form-data");
        assert_eq!(primary, "form-data");
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn test_simple_body_without_equals() {
        let mut request = post_request(&[("Host", "x"), ("Content-Length", "5")]);
        let mut body: &[u8] = b"hello";
        let kind = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::Simple);
        assert_eq!(request.parts().len(), 1);
        assert!(request.parts().get("hello").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_simple_form_body() {
        let mut request = post_request(&[
            ("Content-Length", "27"),
            ("Content-Type", "application/x-www-form-urlencoded"),
        ]);
        let mut body: &[u8] = b"name=J%C3%B6rg+K&age=42&x=y";
        decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap();
        assert_eq!(request.content_type(), Some("application/x-www-form-urlencoded"));
        assert_eq!(
            request.part("name").unwrap().to_string_lossy().unwrap(),
            "Jörg K"
        );
        assert_eq!(request.part("age").unwrap().to_vec().unwrap(), b"42");
        assert!(request.part("x").is_some());
    }

    #[tokio::test]
    async fn test_content_length_errors() {
        for headers in [
            vec![],
            vec![("Content-Length", "-1")],
            vec![("Content-Length", "abc")],
        ] {
            let mut request = post_request(&headers);
            let mut body: &[u8] = b"a=1";
            let err = decode_body(&mut body, &mut request, &Settings::default(), 0)
                .await
                .unwrap_err();
            assert_eq!(err.format_error(), Some(FormatError::LengthRequired));
            assert!(request.parts().is_empty());
        }
    }

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length(Some(" 42 ")), Ok(42));
        assert_eq!(parse_content_length(Some("0")), Ok(0));
        for raw in [None, Some(""), Some("-1"), Some("+5"), Some("12a"), Some("1 2")] {
            assert_eq!(
                parse_content_length(raw),
                Err(FormatError::LengthRequired),
                "{:?}",
                raw
            );
        }
        for raw in ["99999999999999999999999", "18446744073709551615"] {
            assert_eq!(parse_content_length(Some(raw)), Err(FormatError::PayloadTooLarge));
        }
    }

    #[tokio::test]
    async fn test_simple_body_too_large() {
        let mut request = post_request(&[("Content-Length", "100")]);
        let settings = Settings::default().with_max_simple_body_size(10);
        let mut body: &[u8] = b"";
        let err = decode_body(&mut body, &mut request, &settings, 0)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 413);
    }

    #[tokio::test]
    async fn test_truncated_simple_body() {
        let mut request = post_request(&[("Content-Length", "10")]);
        let mut body: &[u8] = b"a=1";
        let err = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::Corrupted));
    }

    #[tokio::test]
    async fn test_get_and_disabled_body_are_ignored() {
        let mut request = Request::from_request_line("GET / HTTP/1.1").unwrap();
        let mut body: &[u8] = b"";
        let kind = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::None);

        let mut request = post_request(&[]);
        let settings = Settings::default().with_allow_body(false);
        let kind = decode_body(&mut body, &mut request, &settings, 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::None);
    }

    #[tokio::test]
    async fn test_multipart_dispatch() {
        let payload =
            b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XyZ--\r\n";
        let length = payload.len().to_string();
        let mut request = post_request(&[
            ("Content-Length", length.as_str()),
            ("Content-Type", "multipart/form-data; boundary=XyZ; charset=UTF-8"),
        ]);
        let mut body: &[u8] = payload;
        let kind = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::Multipart);
        assert_eq!(request.content_type(), Some("multipart/form-data"));
        assert_eq!(request.charset(), Some("UTF-8"));
        assert_eq!(request.boundary(), Some(&b"\r\n--XyZ"[..]));
        assert_eq!(request.part("a").unwrap().to_vec().unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_multipart_without_boundary() {
        let mut request = post_request(&[
            ("Content-Length", "10"),
            ("Content-Type", "multipart/form-data; charset=utf-8"),
        ]);
        let mut body: &[u8] = b"0123456789";
        let err = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::MissingBoundary));
    }

    #[tokio::test]
    async fn test_boundary_on_non_multipart_falls_back() {
        let mut request = post_request(&[
            ("Content-Length", "3"),
            ("Content-Type", "text/plain; boundary=abc"),
        ]);
        let mut body: &[u8] = b"k=v";
        let kind = decode_body(&mut body, &mut request, &Settings::default(), 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::Simple);
        assert_eq!(request.boundary(), None);
        assert_eq!(request.part("k").unwrap().to_vec().unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_multipart_disabled_defers() {
        let mut request = post_request(&[
            ("Content-Length", "10"),
            ("Content-Type", "multipart/form-data; boundary=abc"),
        ]);
        let settings = Settings::default().with_allow_multipart(false);
        let mut body: &[u8] = b"0123456789";
        let kind = decode_body(&mut body, &mut request, &settings, 0)
            .await
            .unwrap();
        assert_eq!(kind, BodyKind::Deferred);
        assert_eq!(body.len(), 10);
    }
}
