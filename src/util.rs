use std::borrow::Cow;

use crate::param::reason_phrase;

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    /// 错误页面，`note` 为空时使用状态码的原因短语。
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => reason_phrase(code).unwrap_or("Unknown Status"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

/// 按 ISO-8859-1 把报文字节转为字符串，任何字节都不会丢失。
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// 表单编码解码：`+` 视为空格，再做百分号解码。非法转义原样保留。
pub fn decode_form(input: &str) -> Vec<u8> {
    let replaced: Cow<str> = if input.contains('+') {
        Cow::Owned(input.replace('+', " "))
    } else {
        Cow::Borrowed(input)
    };
    urlencoding::decode_binary(replaced.as_bytes()).into_owned()
}

/// 与 `decode_form` 相同，结果按 UTF-8 有损转换。
pub fn decode_form_str(input: &str) -> String {
    String::from_utf8_lossy(&decode_form(input)).into_owned()
}

/// 通用的 key=value 切分器。
///
/// 先按 `pair_sep` 切成若干段（跳过空段），每段在第一个 `kv_sep` 处切开；
/// 没有 `kv_sep` 的段得到 `None` 值。不做解码和修剪。
pub fn split_pairs(input: &str, pair_sep: char, kv_sep: char) -> Vec<(&str, Option<&str>)> {
    input
        .split(pair_sep)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once(kv_sep) {
            Some((key, value)) => (key, Some(value)),
            None => (segment, None),
        })
        .collect()
}

/// 按 `sep` 切分，双引号内的分隔符不算；引号内的 `\` 转义下一个字符。
pub fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                segments.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

/// 去除首尾空白，以及成对的外层双引号。
pub fn unquote(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}
