//! Recovery of tool calls that a model wrote as plain text.
//!
//! Some OpenAI-compatible backends ignore the structured `tool_calls` field
//! and print the call inline instead. Four shapes are recognised, tried in
//! order; the first family that yields at least one call wins:
//!
//! 1. bracketed: `[write_file{...}]`, `[write_file: {...}]`
//! 2. function-call: `call:compile_latex{...}`, `read_file({...})`,
//!    `read_file(path="main.tex")`
//! 3. bare: `compile_latex{...}`
//! 4. XML-tagged: `<tool_call>{"name": ..., "arguments": ...}</tool_call>`,
//!    `<function=name>{...}</function>`, `<name>...</name>`
//!
//! Only names in the known tool set are accepted. Inputs that cannot be
//! parsed become `{}` rather than dropping the call.

use std::sync::LazyLock;

use folio_core::tool::ToolInput;
use regex_lite::Regex;
use tracing::{debug, info};

// Call-site patterns; group 1 is the tool name.
static BRACKETED_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*([A-Za-z_][A-Za-z0-9_-]*)\s*:?\s*\{").expect("static regex")
});
static CALL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"call\s*:\s*([A-Za-z_][A-Za-z0-9_-]*)\s*\{").expect("static regex")
});
static PAREN_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_-]*)\(").expect("static regex"));
static BARE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_-]*)\s*\{").expect("static regex"));
static FUNCTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<function=([A-Za-z_][A-Za-z0-9_-]*)>").expect("static regex"));
static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_-]*)>").expect("static regex"));

/// One tool call pulled out of model text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredCall {
    pub name: String,
    pub input: ToolInput,
}

/// Result of a successful recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub calls: Vec<RecoveredCall>,
    /// The original text with every matched call removed
    pub residual: String,
}

/// A matched call and the byte span it occupied.
#[derive(Debug)]
struct Found {
    start: usize,
    end: usize,
    name: String,
    input: ToolInput,
}

type Family = fn(&str, &[&str]) -> Vec<Found>;

const FAMILIES: [(&str, Family); 4] = [
    ("bracketed", find_bracketed),
    ("function_call", find_function_calls),
    ("bare", find_bare),
    ("xml", find_xml),
];

/// Try every pattern family in order against `text`.
pub fn recover_tool_calls(text: &str, known_tools: &[&str]) -> Option<Recovery> {
    if text.trim().is_empty() || known_tools.is_empty() {
        return None;
    }

    for (family, find) in FAMILIES {
        let found = without_overlaps(find(text, known_tools));
        if found.is_empty() {
            continue;
        }

        info!(
            family,
            count = found.len(),
            "Recovered text-based tool calls"
        );

        let mut residual = String::with_capacity(text.len());
        let mut cursor = 0;
        for f in &found {
            residual.push_str(&text[cursor..f.start]);
            cursor = f.end;
        }
        residual.push_str(&text[cursor..]);

        return Some(Recovery {
            calls: found
                .into_iter()
                .map(|f| RecoveredCall {
                    name: f.name,
                    input: f.input,
                })
                .collect(),
            residual: tidy_residual(&residual),
        });
    }

    None
}

fn without_overlaps(mut found: Vec<Found>) -> Vec<Found> {
    found.sort_by_key(|f| f.start);
    let mut kept: Vec<Found> = Vec::with_capacity(found.len());
    for f in found {
        if kept.last().is_none_or(|last| f.start >= last.end) {
            kept.push(f);
        }
    }
    kept
}

/// Collapse the blank runs left behind by removed calls.
fn tidy_residual(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// True when the byte before `at` cannot be part of an identifier.
fn at_word_start(text: &str, at: usize) -> bool {
    at == 0 || !is_ident_byte(text.as_bytes()[at - 1])
}

fn skip_ws(text: &str, mut at: usize) -> usize {
    let bytes = text.as_bytes();
    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    at
}

/// Index just past the delimiter that closes the one at `open`, skipping
/// over quoted strings and nested brackets of every kind.
fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'(' => stack.push(b')'),
            b'[' => stack.push(b']'),
            b'}' | b')' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// `[name{...}]` and `[name: {...}]`
fn find_bracketed(text: &str, known: &[&str]) -> Vec<Found> {
    let mut found = Vec::new();
    for caps in BRACKETED_CALL.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known.contains(&name.as_str()) {
            continue;
        }
        let brace = whole.end() - 1;
        let Some(body_end) = balanced_end(text, brace) else {
            continue;
        };
        let close = skip_ws(text, body_end);
        if text.as_bytes().get(close) != Some(&b']') {
            continue;
        }
        found.push(Found {
            start: whole.start(),
            end: close + 1,
            name: name.as_str().to_string(),
            input: parse_input(&text[brace..body_end]),
        });
    }
    found
}

/// `call:name{...}`, `name({...})` and `name(key=value, ...)`
fn find_function_calls(text: &str, known: &[&str]) -> Vec<Found> {
    let mut found = Vec::new();

    for caps in CALL_PREFIX.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known.contains(&name.as_str()) || !at_word_start(text, whole.start()) {
            continue;
        }
        let brace = whole.end() - 1;
        let Some(end) = balanced_end(text, brace) else {
            continue;
        };
        found.push(Found {
            start: whole.start(),
            end,
            name: name.as_str().to_string(),
            input: parse_input(&text[brace..end]),
        });
    }

    for caps in PAREN_CALL.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known.contains(&name.as_str()) || !at_word_start(text, whole.start()) {
            continue;
        }
        let paren = whole.end() - 1;
        let Some(end) = balanced_end(text, paren) else {
            continue;
        };
        let inner = text[paren + 1..end - 1].trim();
        found.push(Found {
            start: whole.start(),
            end,
            name: name.as_str().to_string(),
            input: parse_input(inner),
        });
    }

    found
}

/// `name{...}` with no surrounding syntax
fn find_bare(text: &str, known: &[&str]) -> Vec<Found> {
    let mut found = Vec::new();
    for caps in BARE_CALL.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known.contains(&name.as_str()) || !at_word_start(text, whole.start()) {
            continue;
        }
        let brace = whole.end() - 1;
        let Some(end) = balanced_end(text, brace) else {
            continue;
        };
        found.push(Found {
            start: whole.start(),
            end,
            name: name.as_str().to_string(),
            input: parse_input(&text[brace..end]),
        });
    }
    found
}

/// `<tool_call>{json}</tool_call>`, `<function=name>{json}</function>` and
/// `<name>...</name>`
fn find_xml(text: &str, known: &[&str]) -> Vec<Found> {
    let mut found = Vec::new();

    let mut from = 0;
    while let Some(rel) = text[from..].find("<tool_call>") {
        let start = from + rel;
        let body_start = start + "<tool_call>".len();
        let Some(close_rel) = text[body_start..].find("</tool_call>") else {
            break;
        };
        let body_end = body_start + close_rel;
        let end = body_end + "</tool_call>".len();
        from = end;

        let Ok(serde_json::Value::Object(obj)) =
            serde_json::from_str::<serde_json::Value>(text[body_start..body_end].trim())
        else {
            continue;
        };
        let Some(name) = obj.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        if !known.contains(&name) {
            continue;
        }
        let args = obj
            .get("arguments")
            .or_else(|| obj.get("input"))
            .or_else(|| obj.get("parameters"));
        let input = match args {
            Some(serde_json::Value::Object(map)) => map.clone(),
            Some(serde_json::Value::String(s)) => parse_input(s),
            _ => ToolInput::new(),
        };
        found.push(Found {
            start,
            end,
            name: name.to_string(),
            input,
        });
    }

    for caps in FUNCTION_TAG.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known.contains(&name.as_str()) {
            continue;
        }
        let Some(close_rel) = text[whole.end()..].find("</function>") else {
            continue;
        };
        let body = &text[whole.end()..whole.end() + close_rel];
        found.push(Found {
            start: whole.start(),
            end: whole.end() + close_rel + "</function>".len(),
            name: name.as_str().to_string(),
            input: parse_input(body.trim()),
        });
    }

    for name in known {
        let open = format!("<{name}>");
        let close = format!("</{name}>");
        let mut from = 0;
        while let Some(rel) = text[from..].find(&open) {
            let start = from + rel;
            let body_start = start + open.len();
            let Some(close_rel) = text[body_start..].find(&close) else {
                break;
            };
            let body = &text[body_start..body_start + close_rel];
            let end = body_start + close_rel + close.len();
            from = end;
            found.push(Found {
                start,
                end,
                name: (*name).to_string(),
                input: parse_tagged_body(body),
            });
        }
    }

    found
}

/// Body of `<name>...</name>`: JSON, nested `<key>value</key>` tags, or
/// relaxed pairs.
fn parse_tagged_body(body: &str) -> ToolInput {
    let body = body.trim();
    if body.starts_with('{') {
        return parse_input(body);
    }

    let mut input = ToolInput::new();
    let mut from = 0;
    while let Some(caps) = OPEN_TAG.captures_at(body, from) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let close = format!("</{}>", key.as_str());
        let Some(close_rel) = body[whole.end()..].find(&close) else {
            from = whole.end();
            continue;
        };
        let value = &body[whole.end()..whole.end() + close_rel];
        input.insert(key.as_str().to_string(), scalar(value.trim()));
        from = whole.end() + close_rel + close.len();
    }
    if input.is_empty() {
        parse_input(body)
    } else {
        input
    }
}

/// Parse a recovered call's arguments: JSON first, then relaxed
/// `key: value` / `key=value` pairs. Never fails.
pub fn parse_input(raw: &str) -> ToolInput {
    let raw = raw.trim();
    if raw.is_empty() {
        return ToolInput::new();
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
        return map;
    }

    let inner = raw
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .unwrap_or(raw);

    let mut input = ToolInput::new();
    for part in split_top_level(inner) {
        let Some(sep) = part.find([':', '=']) else {
            continue;
        };
        let key = part[..sep].trim().trim_matches(|c| c == '"' || c == '\'');
        if key.is_empty() || !key.bytes().all(is_ident_byte) {
            continue;
        }
        input.insert(key.to_string(), scalar(part[sep + 1..].trim()));
    }

    if input.is_empty() {
        debug!(raw_len = raw.len(), "Unparseable recovered tool input, using {{}}");
    }
    input
}

/// Split on commas that are not inside quotes or nested brackets.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// A relaxed value: quoted string, JSON literal, or bare text.
fn scalar(raw: &str) -> serde_json::Value {
    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        let quoted = &raw[1..raw.len() - 1];
        if raw.starts_with('"')
            && let Ok(serde_json::Value::String(s)) = serde_json::from_str(raw)
        {
            return serde_json::Value::String(s);
        }
        return serde_json::Value::String(quoted.to_string());
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v @ (serde_json::Value::Number(_)
        | serde_json::Value::Bool(_)
        | serde_json::Value::Null
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_))) => v,
        _ => serde_json::Value::String(raw.to_string()),
    }
}
