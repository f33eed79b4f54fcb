// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # multipart/form-data 流式解码
//!
//! 请求体格式（`B` 为 boundary）：
//!
//! ```text
//! "--" B CRLF  headers CRLF CRLF  content  CRLF "--" B CRLF  headers ...  CRLF "--" B "--"
//! ```
//!
//! 分段内容通过 [`BoundaryMatcher`] 边读边扫描，不会把整个请求体读进内存。
//! 分隔符 `CRLF "--" B` 之后必须紧跟 `CRLF`（还有下一段）或 `--`（请求体结束），
//! 否则这次匹配是误报，匹配到的字节连同后面两个字节都作为普通内容写回分段。

use std::collections::HashMap;

use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{
    body::parse_parameters,
    config::Settings,
    exception::{Exception, FormatError},
    headers::read_headers,
    param::{MAX_BOUNDARY_LENGTH, MAX_PART_HEADER_BLOCK},
    post::Post,
    util::format_file_size,
};

/// 分隔符的增量匹配器（KMP 自动机）。
///
/// 任意切分的输入都能正确处理：尚未确定是否属于分隔符的字节挂起在匹配器中，
/// 一旦部分匹配失败，不再可能成为分隔符前缀的那些字节会立即输出，既不丢失也不重复。
#[derive(Debug, Clone)]
pub struct BoundaryMatcher {
    delimiter: Vec<u8>,
    failure: Vec<usize>,
    matched: usize,
}

impl BoundaryMatcher {
    pub fn new(delimiter: &[u8]) -> Self {
        assert!(!delimiter.is_empty(), "delimiter must not be empty");
        let mut failure = vec![0; delimiter.len()];
        let mut k = 0;
        for i in 1..delimiter.len() {
            while k > 0 && delimiter[i] != delimiter[k] {
                k = failure[k - 1];
            }
            if delimiter[i] == delimiter[k] {
                k += 1;
            }
            failure[i] = k;
        }
        Self {
            delimiter: delimiter.to_vec(),
            failure,
            matched: 0,
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// 当前挂起的、可能属于分隔符前缀的字节。
    pub fn pending(&self) -> &[u8] {
        &self.delimiter[..self.matched]
    }

    pub fn reset(&mut self) {
        self.matched = 0;
    }

    /// 喂入一段数据。确定属于内容的字节追加到 `out`。
    ///
    /// 返回 `(已消费字节数, 是否找到完整分隔符)`。找到分隔符时立即停止，
    /// 消费数恰好截止到分隔符末尾，匹配器回到初始状态。
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> (usize, bool) {
        let first = self.delimiter[0];
        let mut i = 0;
        while i < input.len() {
            if self.matched == 0 {
                // 快速跳过不可能开始分隔符的字节
                match input[i..].iter().position(|&b| b == first) {
                    Some(offset) => {
                        out.extend_from_slice(&input[i..i + offset]);
                        i += offset;
                    }
                    None => {
                        out.extend_from_slice(&input[i..]);
                        return (input.len(), false);
                    }
                }
            }

            let b = input[i];
            let old = self.matched;
            let mut state = old;
            while state > 0 && self.delimiter[state] != b {
                state = self.failure[state - 1];
            }
            let new = if self.delimiter[state] == b {
                state + 1
            } else {
                0
            };

            // 挂起的字节是 delimiter[..old] 加上 b，新的挂起部分是其长度为 new 的后缀
            let emit = old + 1 - new;
            if emit > old {
                out.extend_from_slice(&self.delimiter[..old]);
                out.push(b);
            } else {
                out.extend_from_slice(&self.delimiter[..emit]);
            }
            i += 1;

            if new == self.delimiter.len() {
                self.matched = 0;
                return (i, true);
            }
            self.matched = new;
        }
        (input.len(), false)
    }
}

/// 一个分段读完之后的去向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Part,
    End,
}

/// 校验 boundary：1 到 70 个 ASCII 字节，不含控制字符。
pub fn validate_boundary(boundary: &str) -> Result<&str, FormatError> {
    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LENGTH
        || !boundary.bytes().all(|b| b.is_ascii() && !b.is_ascii_control())
    {
        return Err(FormatError::InvalidBoundary);
    }
    Ok(boundary)
}

/// 完整分隔符 `CRLF "--" boundary`。
pub fn delimiter_bytes(boundary: &str) -> Vec<u8> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 4);
    delimiter.extend_from_slice(b"\r\n--");
    delimiter.extend_from_slice(boundary.as_bytes());
    delimiter
}

/// 解码 multipart 请求体，每个分段完成后立即以其 `name` 写入 `parts`。
///
/// `reader` 应当已经被限制在 Content-Length 之内。出错时已经写入的分段保留，
/// 未完成的分段随之丢弃（其临时文件在 drop 时删除）。
pub async fn decode<R>(
    reader: &mut R,
    boundary: &str,
    settings: &Settings,
    parts: &mut HashMap<String, Option<Post>>,
    id: u128,
) -> Result<(), Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let boundary = validate_boundary(boundary)?;
    let mut matcher = BoundaryMatcher::new(&delimiter_bytes(boundary));
    let scan_size = (boundary.len() * 5).max(settings.scan_buffer_size());

    // 请求体以不带前导 CRLF 的分隔符开头
    let mut opening = vec![0u8; boundary.len() + 4];
    reader
        .read_exact(&mut opening)
        .await
        .map_err(Exception::structural)?;
    if &opening[..2] != b"--"
        || &opening[2..2 + boundary.len()] != boundary.as_bytes()
        || &opening[2 + boundary.len()..] != b"\r\n"
    {
        return Err(FormatError::BoundaryMismatch.into());
    }

    loop {
        let headers = read_headers(reader, MAX_PART_HEADER_BLOCK).await?;
        let disposition = headers
            .get("content-disposition")
            .ok_or(FormatError::MissingContentDisposition)?;
        let (kind, params) = parse_parameters(disposition);
        if !kind.eq_ignore_ascii_case("form-data") {
            return Err(FormatError::InvalidContentDisposition.into());
        }
        let name = params
            .iter()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.clone())
            .ok_or(FormatError::InvalidContentDisposition)?;
        let filename = params
            .iter()
            .find(|(k, _)| k == "filename")
            .map(|(_, v)| v.clone());
        let content_type = headers.get("content-type").map(str::to_string);

        let mut post = Post::for_part(filename, content_type, headers, settings.memory_threshold());
        let next = scan_part(reader, &mut matcher, &mut post, scan_size).await?;
        post.finish()?;

        debug!(
            "[ID{}]multipart分段{}解码完成，大小{}，{}",
            id,
            name,
            format_file_size(post.size()),
            if post.is_spilled() { "已落盘" } else { "在内存中" }
        );
        if let Some(Some(mut replaced)) = parts.insert(name, Some(post)) {
            replaced.remove();
        }

        if next == Next::End {
            return Ok(());
        }
    }
}

/// 把分段内容复制进 `post`，直到遇到真正的分隔符。
async fn scan_part<R>(
    reader: &mut R,
    matcher: &mut BoundaryMatcher,
    post: &mut Post,
    scan_size: usize,
) -> Result<Next, Exception>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut staging = Vec::with_capacity(scan_size);
    loop {
        let buf = reader.fill_buf().await.map_err(Exception::structural)?;
        if buf.is_empty() {
            return Err(FormatError::UnterminatedMultipart.into());
        }
        let (used, found) = matcher.feed(buf, &mut staging);
        reader.consume(used);

        if found {
            let mut tail = [0u8; 2];
            reader.read_exact(&mut tail).await.map_err(|e| {
                debug!("读取分隔符后缀失败：{}", e);
                Exception::Format(FormatError::UnterminatedMultipart)
            })?;
            match &tail {
                b"\r\n" => {
                    post.write(&staging)?;
                    return Ok(Next::Part);
                }
                b"--" => {
                    post.write(&staging)?;
                    return Ok(Next::End);
                }
                _ => {
                    // 误报：分隔符本身是内容，后两个字节重新参与扫描
                    staging.extend_from_slice(matcher.delimiter());
                    let (_, again) = matcher.feed(&tail, &mut staging);
                    debug_assert!(!again);
                }
            }
        }

        if staging.len() >= scan_size {
            post.write(&staging)?;
            staging.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn feed_all(matcher: &mut BoundaryMatcher, chunks: &[&[u8]]) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        for chunk in chunks {
            let (used, found) = matcher.feed(chunk, &mut out);
            if found {
                return (out, true);
            }
            assert_eq!(used, chunk.len());
        }
        (out, false)
    }

    async fn decode_body(
        body: &[u8],
        settings: Settings,
    ) -> Result<HashMap<String, Option<Post>>, Exception> {
        let mut reader = body;
        let mut parts = HashMap::new();
        decode(&mut reader, "ABC123", &settings, &mut parts, 0).await?;
        Ok(parts)
    }

    fn part<'a>(parts: &'a HashMap<String, Option<Post>>, name: &str) -> &'a Post {
        parts.get(name).and_then(Option::as_ref).unwrap()
    }

    #[test]
    fn test_matcher_finds_delimiter_across_chunks() {
        let mut matcher = BoundaryMatcher::new(b"\r\n--XY");
        let (out, found) = feed_all(&mut matcher, &[b"hello\r", b"\n-", b"-X", b"Yrest"]);
        assert!(found);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_matcher_releases_partial_match() {
        let mut matcher = BoundaryMatcher::new(b"\r\n--XY");
        let (out, found) = feed_all(&mut matcher, &[b"a\r\n--X", b"Z\r\n"]);
        assert!(!found);
        assert_eq!(out, b"a\r\n--XZ");
        assert_eq!(matcher.pending(), b"\r\n");
    }

    #[test]
    fn test_matcher_overlapping_prefix() {
        // "\r\n\r\n--XY"：第一个 CRLF 是内容
        let mut matcher = BoundaryMatcher::new(b"\r\n--XY");
        let (out, found) = feed_all(&mut matcher, &[b"\r\n\r\n--XY"]);
        assert!(found);
        assert_eq!(out, b"\r\n");
    }

    #[test]
    fn test_validate_boundary() {
        assert!(validate_boundary("ABC123").is_ok());
        assert!(validate_boundary(&"a".repeat(70)).is_ok());
        assert!(validate_boundary(&"a".repeat(71)).is_err());
        assert!(validate_boundary("").is_err());
        assert!(validate_boundary("ab\rc").is_err());
        assert!(validate_boundary("grüße").is_err());
    }

    #[tokio::test]
    async fn test_single_field() {
        let body = b"--ABC123\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\n\
                     value1\r\n--ABC123--\r\n";
        let parts = decode_body(body, Settings::default()).await.unwrap();
        assert_eq!(parts.len(), 1);
        let field = part(&parts, "field1");
        assert_eq!(field.filename(), None);
        assert_eq!(field.to_vec().unwrap(), b"value1");
        assert!(!field.is_spilled());
    }

    #[tokio::test]
    async fn test_field_and_file() {
        let body = b"--ABC123\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello\r\n\
--ABC123\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a b.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
line one\r\nline two\r\n\
--ABC123--";
        let mut parts = decode_body(body, Settings::default()).await.unwrap();
        assert_eq!(part(&parts, "title").to_vec().unwrap(), b"hello");

        let upload = part(&parts, "upload");
        assert_eq!(upload.filename(), Some("a b.txt"));
        assert_eq!(upload.content_type(), Some("text/plain"));
        assert_eq!(upload.headers().get("content-type"), Some("text/plain"));
        assert!(upload.is_spilled());
        assert_eq!(upload.to_vec().unwrap(), b"line one\r\nline two");

        let path = upload.path().unwrap().to_path_buf();
        for post in parts.values_mut().flatten() {
            post.remove();
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_quoted_filename_with_semicolon() {
        let body = b"--ABC123\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"a;b=c.txt\"; x=1\r\n\
\r\n\
data\r\n\
--ABC123--";
        let mut parts = decode_body(body, Settings::default()).await.unwrap();
        let doc = part(&parts, "doc");
        assert_eq!(doc.filename(), Some("a;b=c.txt"));
        assert_eq!(doc.to_vec().unwrap(), b"data");
        for post in parts.values_mut().flatten() {
            post.remove();
        }
    }

    #[tokio::test]
    async fn test_false_positive_boundary_is_preserved() {
        let body = b"--ABC123\r\n\
Content-Disposition: form-data; name=\"data\"\r\n\
\r\n\
x\r\n--ABC123XY\r\n--ABC12\r\n--ABC123\r--\r\n--ABC123--";
        let parts = decode_body(body, Settings::default()).await.unwrap();
        assert_eq!(
            part(&parts, "data").to_vec().unwrap(),
            b"x\r\n--ABC123XY\r\n--ABC12\r\n--ABC123\r--"
        );
    }

    #[tokio::test]
    async fn test_memory_threshold() {
        let settings = Settings::default().with_memory_threshold(16);
        let small = "s".repeat(15);
        let large = "L".repeat(40);
        let body = format!(
            "--ABC123\r\nContent-Disposition: form-data; name=\"small\"\r\n\r\n{}\r\n\
--ABC123\r\nContent-Disposition: form-data; name=\"large\"\r\n\r\n{}\r\n--ABC123--",
            small, large
        );
        let mut parts = decode_body(body.as_bytes(), settings).await.unwrap();

        let small_part = part(&parts, "small");
        assert!(!small_part.is_spilled());
        assert_eq!(small_part.size(), 15);

        let large_part = part(&parts, "large");
        assert!(large_part.is_spilled());
        assert_eq!(large_part.size(), 40);
        assert_eq!(large_part.to_vec().unwrap(), large.as_bytes());

        for post in parts.values_mut().flatten() {
            post.remove();
        }
    }

    #[tokio::test]
    async fn test_small_scan_buffer() {
        let settings = Settings::default().with_scan_buffer_size(1);
        let content = "0123456789".repeat(50);
        let body = format!(
            "--ABC123\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n{}\r\n--ABC123--",
            content
        );
        let parts = decode_body(body.as_bytes(), settings).await.unwrap();
        assert_eq!(part(&parts, "f").to_vec().unwrap(), content.as_bytes());
    }

    #[tokio::test]
    async fn test_bad_opening_boundary() {
        let body = b"--WRONG1\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--ABC123--";
        let err = decode_body(body, Settings::default()).await.unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::BoundaryMismatch));
    }

    #[tokio::test]
    async fn test_missing_content_disposition() {
        let body = b"--ABC123\r\nContent-Type: text/plain\r\n\r\nv\r\n--ABC123--";
        let err = decode_body(body, Settings::default()).await.unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::MissingContentDisposition));
    }

    #[tokio::test]
    async fn test_wrong_disposition_type() {
        let body =
            b"--ABC123\r\nContent-Disposition: attachment; name=\"a\"\r\n\r\nv\r\n--ABC123--";
        let err = decode_body(body, Settings::default()).await.unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::InvalidContentDisposition));
    }

    #[tokio::test]
    async fn test_unterminated_body() {
        let body =
            b"--ABC123\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue without end";
        let err = decode_body(body, Settings::default()).await.unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::UnterminatedMultipart));

        let body = b"--ABC123\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--ABC123-";
        let err = decode_body(body, Settings::default()).await.unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::UnterminatedMultipart));
    }

    #[tokio::test]
    async fn test_finished_parts_survive_later_error() {
        let body = b"--ABC123\r\nContent-Disposition: form-data; name=\"ok\"\r\n\r\nfine\r\n\
--ABC123\r\nX-Nothing: here\r\n\r\nbad\r\n--ABC123--";
        let mut reader = &body[..];
        let mut parts = HashMap::new();
        let result = decode(&mut reader, "ABC123", &Settings::default(), &mut parts, 0).await;
        assert!(result.is_err());
        assert_eq!(part(&parts, "ok").to_vec().unwrap(), b"fine");
    }

    #[tokio::test]
    async fn test_duplicate_name_replaces_and_removes() {
        let body = b"--ABC123\r\n\
Content-Disposition: form-data; name=\"f\"; filename=\"1\"\r\n\r\none\r\n\
--ABC123\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\ntwo\r\n--ABC123--";
        let mut reader = &body[..];
        let mut parts = HashMap::new();
        decode(&mut reader, "ABC123", &Settings::default(), &mut parts, 0)
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(part(&parts, "f").to_vec().unwrap(), b"two");
    }

    /// 朴素参考实现：第一个后面紧跟 CRLF 或 `--` 的分隔符位置。
    fn naive_end(data: &[u8], delimiter: &[u8]) -> Option<usize> {
        (0..data.len()).find(|&p| {
            let after = p + delimiter.len();
            data[p..].starts_with(delimiter)
                && matches!(data.get(after..after + 2), Some(b"\r\n") | Some(b"--"))
        })
    }

    proptest! {
        #[test]
        fn prop_matcher_is_chunking_invariant(
            input in proptest::collection::vec(
                prop_oneof![
                    Just(b'\r'),
                    Just(b'\n'),
                    Just(b'-'),
                    Just(b'X'),
                    Just(b'Y'),
                    any::<u8>()
                ],
                0..200,
            ),
            cuts in proptest::collection::vec(1usize..16, 0..20),
        ) {
            let delimiter = b"\r\n--XY";
            let mut whole = BoundaryMatcher::new(delimiter);
            let mut expected = Vec::new();
            let (expected_used, expected_found) = whole.feed(&input, &mut expected);

            let mut chunked = BoundaryMatcher::new(delimiter);
            let mut out = Vec::new();
            let mut offset = 0;
            let mut found = false;
            let mut cut_iter = cuts.iter();
            while offset < input.len() {
                let step = cut_iter.next().copied().unwrap_or(input.len());
                let end = (offset + step).min(input.len());
                let (used, hit) = chunked.feed(&input[offset..end], &mut out);
                offset += used;
                if hit {
                    found = true;
                    break;
                }
            }
            prop_assert_eq!(found, expected_found);
            prop_assert_eq!(offset, expected_used);
            prop_assert_eq!(&out, &expected);
            if !found {
                let mut rebuilt = out.clone();
                rebuilt.extend_from_slice(chunked.pending());
                prop_assert_eq!(rebuilt, input);
            }
        }

        #[test]
        fn prop_false_positives_are_preserved(
            tokens in proptest::collection::vec(
                prop_oneof![
                    Just("\r\n--ABC123"),
                    Just("\r\n--ABC"),
                    Just("\r\n"),
                    Just("\r"),
                    Just("-"),
                    Just("x"),
                    Just("ABC123"),
                ],
                0..40,
            ),
            scan in 1usize..64,
        ) {
            let content: String = tokens.concat();
            let delimiter = b"\r\n--ABC123";
            let mut tail = content.clone().into_bytes();
            tail.extend_from_slice(b"\r\n--ABC123--");
            prop_assume!(naive_end(&tail, delimiter) == Some(content.len()));

            let mut body =
                b"--ABC123\r\nContent-Disposition: form-data; name=\"p\"\r\n\r\n".to_vec();
            body.extend_from_slice(&tail);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let settings = Settings::default()
                .with_scan_buffer_size(scan)
                .with_memory_threshold(32);
            let mut parts = runtime.block_on(decode_body(&body, settings)).unwrap();
            let post = part(&parts, "p");
            prop_assert_eq!(post.size(), content.len() as u64);
            prop_assert_eq!(post.to_vec().unwrap(), content.into_bytes());
            for post in parts.values_mut().flatten() {
                post.remove();
            }
        }
    }
}
