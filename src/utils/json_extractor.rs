//! 结构化文本提取器
//!
//! 模型返回的文本里通常夹带着 JSON，但格式并不可靠：可能包在 ```json 代码块中，
//! 可能前后混着说明文字，可能带尾随逗号或单引号。这里按层级逐个尝试，第一个成功的结果胜出：
//!
//! 1. 带 json 标记的代码块
//! 2. 从第一个目标括号开始做嵌套深度扫描，截取与之匹配的片段
//! 3. 对片段做两种廉价修复（去尾随逗号、单引号转双引号）后再解析一次
//! 4. 全部失败时退化为按行提取列表项
//!
//! 所有函数都不会 panic，失败时返回 `None` 或空列表，由调用方提供兜底。

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED_JSON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n(.*?)```").ok());

static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").ok());

static NUMBERED_ITEM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+\s*[.)]\s+(.+)$").ok());

/// 期望提取的 JSON 结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Array,
    Object,
}

impl JsonKind {
    fn opener(self) -> char {
        match self {
            JsonKind::Array => '[',
            JsonKind::Object => '{',
        }
    }

    fn closer(self) -> char {
        match self {
            JsonKind::Array => ']',
            JsonKind::Object => '}',
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            JsonKind::Array => value.is_array(),
            JsonKind::Object => value.is_object(),
        }
    }
}

/// 第一层：解析带 json 标记的代码块
pub fn from_fenced_block(text: &str, kind: JsonKind) -> Option<Value> {
    let re = FENCED_JSON.as_ref()?;
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|body| serde_json::from_str::<Value>(body.as_str().trim()).ok())
        .find(|value| kind.accepts(value))
}

/// 第二层：从 `start` 之后第一个目标括号开始做深度扫描，返回匹配括号之间（含）的片段
///
/// 双引号字符串内部的括号不计入深度。找不到匹配的闭合括号时返回 `None`。
pub fn from_balanced_span(text: &str, kind: JsonKind) -> Option<&str> {
    let start = text.find(kind.opener())?;
    balanced_span_at(text, start, kind)
}

fn balanced_span_at(text: &str, start: usize, kind: JsonKind) -> Option<&str> {
    let (open, close) = (kind.opener(), kind.closer());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 第三层：去掉闭合括号前的尾随逗号，并把单引号字符串转换为双引号字符串
pub fn repair_json(span: &str) -> String {
    let without_trailing = match TRAILING_COMMA.as_ref() {
        Some(re) => re.replace_all(span, "$1").into_owned(),
        None => span.to_string(),
    };
    normalize_single_quotes(&without_trailing)
}

/// 单引号转双引号
///
/// 已有的双引号字符串原样保留；单引号字符串内部的 `"` 会被转义。
/// 单引号只有在后面（跳过空白）紧跟 `,` `:` `]` `}` 或文本结尾时才视为字符串结束，
/// 这样 `'don't'` 这类带撇号的内容不会被提前截断。
fn normalize_single_quotes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' => {
                // 原样复制双引号字符串
                out.push(ch);
                i += 1;
                let mut escaped = false;
                while i < chars.len() {
                    let c = chars[i];
                    out.push(c);
                    i += 1;
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    if c == '\\' && i + 1 < chars.len() && chars[i + 1] == '\'' {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    if c == '\'' && closes_single_quoted(&chars, i) {
                        i += 1;
                        break;
                    }
                    if c == '"' {
                        out.push('\\');
                    }
                    out.push(c);
                    i += 1;
                }
                out.push('"');
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

fn closes_single_quoted(chars: &[char], quote_at: usize) -> bool {
    chars[quote_at + 1..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_none_or(|c| matches!(c, ',' | ':' | ']' | '}'))
}

/// 组合前三层，返回第一个符合期望结构的 JSON 值
pub fn extract_json(text: &str, kind: JsonKind) -> Option<Value> {
    if let Some(value) = from_fenced_block(text, kind) {
        return Some(value);
    }

    for (start, _) in text.match_indices(kind.opener()) {
        let Some(span) = balanced_span_at(text, start, kind) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(span)
            && kind.accepts(&value)
        {
            return Some(value);
        }
        if let Ok(value) = serde_json::from_str::<Value>(&repair_json(span))
            && kind.accepts(&value)
        {
            return Some(value);
        }
    }
    None
}

/// 第四层：按行提取列表项
///
/// 识别带引号的字符串、`1. xxx` / `1) xxx` 编号项以及 `-` `*` `•` 项目符号，去掉装饰后返回。
pub fn list_items_from_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| list_item(line.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

fn list_item(line: &str) -> Option<String> {
    if line.is_empty() || line.starts_with("```") {
        return None;
    }

    let body = if line.starts_with('"') {
        let inner = line.trim_end_matches(',').trim();
        if inner.len() < 2 || !inner.ends_with('"') {
            return None;
        }
        inner[1..inner.len() - 1].to_string()
    } else if let Some(caps) = NUMBERED_ITEM.as_ref().and_then(|re| re.captures(line)) {
        caps.get(1)?.as_str().to_string()
    } else if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        rest.to_string()
    } else {
        return None;
    };

    Some(clean_item(&body))
}

fn clean_item(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim_matches('*')
        .trim()
        .to_string()
}

/// 提取字符串列表（例如检索查询）
///
/// 依次接受：字符串数组、含字符串数组字段的对象（优先 `preferred_key`），最后按行提取。
/// 文本以对象开头（或带对象代码块）时先按对象处理，避免把对象内部的第一个数组当成结果。
pub fn extract_string_list(text: &str, preferred_key: &str) -> Vec<String> {
    let object_first = match (text.find('{'), text.find('[')) {
        (Some(brace), Some(bracket)) => brace < bracket,
        (Some(_), None) => true,
        _ => false,
    } || from_fenced_block(text, JsonKind::Object).is_some();

    if object_first && let Some(strings) = strings_from_object(text, preferred_key) {
        return strings;
    }

    if let Some(Value::Array(items)) = extract_json(text, JsonKind::Array) {
        let strings = strings_of(&items);
        if !strings.is_empty() {
            return strings;
        }
    }

    if !object_first && let Some(strings) = strings_from_object(text, preferred_key) {
        return strings;
    }

    list_items_from_lines(text)
}

fn strings_from_object(text: &str, preferred_key: &str) -> Option<Vec<String>> {
    let Value::Object(map) = extract_json(text, JsonKind::Object)? else {
        return None;
    };
    let preferred = map.get(preferred_key).and_then(Value::as_array);
    let any_array = map.values().filter_map(Value::as_array).next();
    let strings = strings_of(preferred.or(any_array)?);
    (!strings.is_empty()).then_some(strings)
}

fn strings_of(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => obj
                .get("query")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}
