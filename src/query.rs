//! 查询参数树。
//!
//! `a[b]=1`、`a.b=1`、`a[]=1`、`a[0]=1` 这样的键会被展开为嵌套的 JSON 对象/数组。
//! 值一律为字符串；没有 `=` 的键写入 `null`。

use serde_json::{Map, Value};

use crate::util::{decode_form_str, split_pairs};

/// 显式数组下标的上限，超出时按追加处理，避免 `a[999999999]` 撑爆内存。
const MAX_INDEX: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Append,
}

/// 解析查询字符串并写入 `root`。`root` 不是对象时会被替换为空对象。
pub fn parse_query(query: &str, root: &mut Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    for (raw_key, raw_value) in split_pairs(query, '&', '=') {
        let key = decode_form_str(raw_key);
        if key.is_empty() {
            continue;
        }
        let value = match raw_value {
            Some(v) => Value::String(decode_form_str(v)),
            None => Value::Null,
        };
        insert_path(root, &key, value);
    }
}

/// 按括号/点路径把 `value` 写入 `root`，后写入者覆盖先写入者。
pub fn insert_path(root: &mut Value, key: &str, value: Value) {
    let segments = split_key(key);
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    insert_segments(root, &segments, value);
}

fn split_key(key: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    // 括号没有闭合，按字面量处理
                    current.push('[');
                    current.push_str(&inner);
                    continue;
                }
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                segments.push(bracket_segment(&inner));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    segments
}

fn bracket_segment(inner: &str) -> Segment {
    if inner.is_empty() {
        return Segment::Append;
    }
    match inner.parse::<usize>() {
        Ok(index) if index <= MAX_INDEX => Segment::Index(index),
        Ok(_) => Segment::Append,
        Err(_) => Segment::Key(inner.to_string()),
    }
}

fn insert_segments(slot: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *slot = value;
        return;
    };
    match first {
        Segment::Key(key) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(map) = slot {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                insert_segments(child, rest, value);
            }
        }
        Segment::Index(index) => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                insert_segments(&mut items[*index], rest, value);
            }
        }
        Segment::Append => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                items.push(Value::Null);
                let last = items.len() - 1;
                insert_segments(&mut items[last], rest, value);
            }
        }
    }
}
