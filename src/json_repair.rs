//! Heuristic cleanup of model output so it parses as JSON.
//!
//! Models wrap JSON in markdown fences, add prose around it, and leave
//! trailing commas. This is text repair, not a parser: when the cleaned text
//! still isn't JSON the caller gets the `serde_json` error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static FENCED_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("fenced regex"));
static BARE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex"));

/// Extract the JSON object from raw model text and strip trailing commas.
///
/// Prefers the contents of a fenced block, else the span from the first `{`
/// to the last `}`. Text with neither is returned trimmed.
pub fn clean_json_response(text: &str) -> String {
    let extracted = if let Some(caps) = FENCED_OBJECT.captures(text) {
        caps.get(1).map_or(text, |m| m.as_str())
    } else if let Some(m) = BARE_OBJECT.find(text) {
        m.as_str()
    } else {
        text
    };

    TRAILING_COMMA
        .replace_all(extracted, "$1")
        .trim()
        .to_string()
}

/// Clean then deserialize.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&clean_json_response(text))
}

/// Up to `radius` chars each side of a parse error, for logs.
pub fn error_window(text: &str, err: &serde_json::Error, radius: usize) -> String {
    // serde_json reports 1-based line/column; map back to a char offset
    let mut offset = 0usize;
    for (idx, line) in text.split('\n').enumerate() {
        if idx + 1 == err.line() {
            offset += err.column().saturating_sub(1).min(line.chars().count());
            break;
        }
        offset += line.chars().count() + 1;
    }
    let start = offset.saturating_sub(radius);
    text.chars().skip(start).take(radius * 2).collect()
}

/// First `n` chars, for logs.
pub fn snippet(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let raw = "Here is the registry:\n```json\n{\"a\": 1}\n```\nLet me know!";
        assert_eq!(clean_json_response(raw), "{\"a\": 1}");
    }

    #[test]
    fn extracts_unlabelled_fence() {
        let raw = "```\n{\"a\": [1, 2]}\n```";
        assert_eq!(clean_json_response(raw), "{\"a\": [1, 2]}");
    }

    #[test]
    fn falls_back_to_outermost_braces() {
        let raw = "Sure. {\"outer\": {\"inner\": true}} Hope that helps.";
        assert_eq!(clean_json_response(raw), "{\"outer\": {\"inner\": true}}");
    }

    #[test]
    fn strips_trailing_commas() {
        let raw = "{\"a\": [1, 2,], \"b\": {\"c\": 3,\n},}";
        let cleaned = clean_json_response(raw);
        assert_eq!(cleaned, "{\"a\": [1, 2], \"b\": {\"c\": 3\n}}");
        let v: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(v["b"]["c"], 3);
    }

    #[test]
    fn clean_json_is_unchanged() {
        let clean = r#"{"evidence_registry": {"E001": {"quote": "hi", "type": "direct_quote"}}}"#;
        assert_eq!(clean_json_response(clean), clean);
        assert_eq!(clean_json_response(&clean_json_response(clean)), clean);
    }

    #[test]
    fn garbage_still_fails_to_parse() {
        let res: Result<serde_json::Value, _> = parse_model_json("I could not analyze this call.");
        assert!(res.is_err());
    }

    #[test]
    fn error_window_points_near_failure() {
        let text = "{\"a\": 1, \"b\": oops}";
        let err = serde_json::from_str::<serde_json::Value>(text).unwrap_err();
        let window = error_window(text, &err, 5);
        assert!(window.contains("oop"), "window was {:?}", window);
    }
}
