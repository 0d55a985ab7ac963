//! 从推理服务输出中提取 JSON
//!
//! 服务不保证输出格式：先去掉 ```json ... ``` 围栏再整体解析，失败则取第一个括号平衡的 `{...}` 子串。
//! 两步都失败返回 None，由调用方使用各自的保守默认值。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// 去掉 Markdown 代码围栏；无围栏时原样返回（已 trim）
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// 第一个括号平衡的 `{...}` 子串（忽略字符串字面量里的括号）
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 防御式解析：围栏剥离 → 整体解析 → 首个平衡对象解析
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Option<T> {
    let body = strip_code_fences(text);
    if let Ok(v) = serde_json::from_str::<T>(body) {
        return Some(v);
    }
    let candidate = first_balanced_object(body).or_else(|| first_balanced_object(text))?;
    match serde_json::from_str::<T>(candidate) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("lenient JSON parse failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_fences() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_balanced_object_ignores_braces_in_strings() {
        let raw = "noise {\"text\": \"a } b\", \"n\": {\"x\": 1}} trailing {";
        assert_eq!(
            first_balanced_object(raw),
            Some("{\"text\": \"a } b\", \"n\": {\"x\": 1}}")
        );
        assert_eq!(first_balanced_object("{ never closed"), None);
    }

    #[test]
    fn test_parse_lenient_variants() {
        let v: Option<Value> = parse_lenient("```\n{\"ok\": true}\n```");
        assert_eq!(v.and_then(|v| v["ok"].as_bool()), Some(true));

        let v: Option<Value> = parse_lenient("Sure! {\"ok\": false} hope this helps");
        assert_eq!(v.and_then(|v| v["ok"].as_bool()), Some(false));

        let v: Option<Value> = parse_lenient("I cannot answer that.");
        assert!(v.is_none());
    }
}
