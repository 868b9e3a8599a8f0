use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::workflow::state::{ChangeAction, CodeChange, Route};

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("static regex"));

static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)((?:src|public|components|pages|utils|hooks|styles|tests?|__tests__)[/\w\-\.]*(?:\.test\.jsx?|\.test\.tsx?|\.json|\.jsx?|\.tsx?|\.s?css|\.html|\.md))",
    )
    .expect("static regex")
});

static FILE_MARKER_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s\d\.#\*`]+").expect("static regex"));

static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passed").expect("static regex"));

static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) failed").expect("static regex"));

/// What the Router made of a completion-provider reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    Parsed {
        route: Route,
        confidence: f64,
        reason: String,
    },
    /// The reply named no valid route; carries the raw text for logging.
    Unparsed(String),
}

/// The first `{...}` block in `content` that decodes as a JSON object.
///
/// Replies routinely wrap the object in prose or a code fence, so every
/// brace-delimited candidate is tried in order.
pub fn extract_json_object(content: &str) -> Option<Map<String, Value>> {
    JSON_OBJECT_RE
        .find_iter(content)
        .find_map(|m| match serde_json::from_str::<Value>(m.as_str()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode a routing reply: a JSON `{route, confidence, reason}` object, or a bare route name.
pub fn parse_route_decision(content: &str) -> RouteDecision {
    let content = content.trim();

    if let Some(map) = extract_json_object(content) {
        let route = map
            .get("route")
            .and_then(Value::as_str)
            .and_then(Route::parse);
        return match route {
            Some(route) => RouteDecision::Parsed {
                route,
                confidence: number_field(&map, "confidence").unwrap_or(0.5),
                reason: map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            None => RouteDecision::Unparsed(content.to_string()),
        };
    }

    match Route::parse(content) {
        Some(route) => RouteDecision::Parsed {
            route,
            confidence: 0.5,
            reason: String::new(),
        },
        None => RouteDecision::Unparsed(content.to_string()),
    }
}

/// Pull a repository-relative file path out of one line of model output.
///
/// Recognises well-known source directories with a known extension, or an
/// explicit `File:` marker followed by anything containing a `/`.
pub fn extract_file_path(line: &str) -> Option<String> {
    if let Some(caps) = FILE_PATH_RE.captures(line) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    if line.to_lowercase().contains("file:") {
        let (_, rest) = line.split_once(':')?;
        let path = FILE_MARKER_PREFIX_RE.replace(rest.trim(), "");
        let path = path.trim_matches(|c| c == '`' || c == '*' || c == ' ');
        if !path.is_empty() && path.contains('/') {
            return Some(path.to_string());
        }
    }

    None
}

/// Split a code-generation reply into file changes.
///
/// Each fenced block is paired with the most recent path-bearing line above
/// it. Blocks with no path, and empty blocks, are dropped.
pub fn parse_code_response(content: &str) -> Vec<CodeChange> {
    let mut changes = Vec::new();
    let mut current_file: Option<String> = None;
    let mut block: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                if let Some(file_path) = current_file.take() {
                    if !block.is_empty() {
                        changes.push(CodeChange {
                            file_path,
                            content: block.join("\n"),
                            action: ChangeAction::Create,
                        });
                    }
                }
                block.clear();
            }
            in_block = !in_block;
            continue;
        }

        if in_block {
            block.push(line);
        } else if let Some(path) = extract_file_path(line) {
            current_file = Some(path);
        }
    }

    changes
}

/// Decode a completion-check reply into `(complete, reason)`.
pub fn parse_completion_check(content: &str) -> (bool, String) {
    if let Some(map) = extract_json_object(content) {
        if let Some(complete) = map.get("complete") {
            let complete = match complete {
                Value::Bool(b) => *b,
                Value::String(s) => s.eq_ignore_ascii_case("true"),
                _ => false,
            };
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return (complete, reason);
        }
    }

    let lowered = content.to_lowercase();
    let complete = lowered.contains("\"complete\": true") || lowered.contains("\"complete\":true");
    (complete, String::new())
}

/// `(passed, failed)` counts from test-runner console output.
///
/// Only output mentioning `Tests:` is trusted. The per-test summary line is
/// preferred over the suite line; missing counts are zero.
pub fn parse_test_counts(output: &str) -> (u32, u32) {
    if !output.contains("Tests:") {
        return (0, 0);
    }

    let scope = output
        .lines()
        .find(|l| l.contains("Tests:") && !l.contains("Test Suites:"))
        .unwrap_or(output);

    let count = |re: &Regex| -> u32 {
        re.captures(scope)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    (count(&PASSED_RE), count(&FAILED_RE))
}

/// The first `max` characters of `text`.
pub fn head_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// The last `max` characters of `text`. Applying it twice changes nothing.
pub fn tail_chars(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }
    text.chars().skip(len - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_decision_from_wrapped_json() {
        let reply = "Sure.\n```json\n{\"route\": \"Tester\", \"confidence\": 0.8, \"reason\": \"code ready\"}\n```";
        assert_eq!(
            parse_route_decision(reply),
            RouteDecision::Parsed {
                route: Route::Tester,
                confidence: 0.8,
                reason: "code ready".to_string(),
            }
        );
    }

    #[test]
    fn test_route_decision_bare_word() {
        assert_eq!(
            parse_route_decision("  Reporter \n"),
            RouteDecision::Parsed {
                route: Route::Reporter,
                confidence: 0.5,
                reason: String::new(),
            }
        );
    }

    #[test]
    fn test_route_decision_unparsed_cases() {
        assert!(matches!(
            parse_route_decision(r#"{"route": "deploy", "confidence": 0.9}"#),
            RouteDecision::Unparsed(_)
        ));
        assert!(matches!(
            parse_route_decision("I think we should test next"),
            RouteDecision::Unparsed(_)
        ));
        assert!(matches!(parse_route_decision("{not json}"), RouteDecision::Unparsed(_)));
        assert!(matches!(parse_route_decision(""), RouteDecision::Unparsed(_)));
    }

    #[test]
    fn test_route_decision_skips_non_object_braces() {
        let reply = r#"State {has_plan} noted. {"route": "implementer", "confidence": "0.7"}"#;
        match parse_route_decision(reply) {
            RouteDecision::Parsed {
                route, confidence, ..
            } => {
                assert_eq!(route, Route::Implementer);
                assert_eq!(confidence, 0.7);
            }
            other => panic!("expected parsed decision, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_file_path_from_markdown() {
        assert_eq!(
            extract_file_path("**File: `src/components/Login.jsx`**").as_deref(),
            Some("src/components/Login.jsx")
        );
        assert_eq!(
            extract_file_path("### 1. src/components/__tests__/Login.test.jsx").as_deref(),
            Some("src/components/__tests__/Login.test.jsx")
        );
        assert_eq!(
            extract_file_path("Update src/data/config.json next").as_deref(),
            Some("src/data/config.json")
        );
        assert_eq!(extract_file_path("Here is the implementation:"), None);
    }

    #[test]
    fn test_extract_file_path_marker_fallback() {
        assert_eq!(
            extract_file_path("File: 2. `app/routes/index.rb`").as_deref(),
            Some("app/routes/index.rb")
        );
        assert_eq!(extract_file_path("file: README"), None);
    }

    #[test]
    fn test_parse_code_response_pairs_paths_with_blocks() {
        let reply = "\
Test first.

**src/components/__tests__/Login.test.jsx**
```jsx
import Login from '../Login';
test('renders', () => {});
```

Then the component:

File: src/components/Login.jsx
```jsx
export default function Login() {}
```

Usage:
```bash
npm test
```
";
        let changes = parse_code_response(reply);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].file_path, "src/components/__tests__/Login.test.jsx");
        assert!(changes[0].content.contains("test('renders'"));
        assert_eq!(changes[1].file_path, "src/components/Login.jsx");
        assert_eq!(changes[1].content, "export default function Login() {}");
        assert!(changes.iter().all(|c| c.action == ChangeAction::Create));
    }

    #[test]
    fn test_parse_code_response_without_paths() {
        assert!(parse_code_response("```js\nconsole.log(1)\n```").is_empty());
        assert!(parse_code_response("no code at all").is_empty());
    }

    #[test]
    fn test_parse_completion_check() {
        assert_eq!(
            parse_completion_check(r#"Result: {"complete": true, "reason": "all there"}"#),
            (true, "all there".to_string())
        );
        assert_eq!(
            parse_completion_check(r#"{"complete": false, "reason": "missing form"}"#),
            (false, "missing form".to_string())
        );
        assert!(!parse_completion_check(r#"{"done": true}"#).0);
        assert!(parse_completion_check("\"complete\":true, {broken").0);
        assert!(!parse_completion_check("looks incomplete").0);
    }

    #[test]
    fn test_parse_test_counts() {
        assert_eq!(parse_test_counts("Tests: 12 passed, 0 failed"), (12, 0));
        assert_eq!(parse_test_counts("Tests: 3 passed, 2 failed"), (3, 2));
        assert_eq!(parse_test_counts("12 passed"), (0, 0));
        assert_eq!(parse_test_counts("No tests found, exiting with code 0"), (0, 0));
    }

    #[test]
    fn test_parse_test_counts_prefers_test_line_over_suites() {
        let jest = "\
Test Suites: 1 failed, 3 passed, 4 total
Tests:       2 failed, 9 passed, 11 total
Snapshots:   0 total
Time:        2.31 s";
        assert_eq!(parse_test_counts(jest), (9, 2));
    }

    #[test]
    fn test_tail_chars_is_idempotent() {
        let capture = "é".repeat(2500) + &"x".repeat(2500);
        let once = tail_chars(&capture, 2000);
        assert_eq!(once.chars().count(), 2000);
        assert_eq!(tail_chars(&once, 2000), once);
        assert_eq!(tail_chars("short", 2000), "short");
    }

    #[test]
    fn test_head_chars() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(head_chars("hi", 10), "hi");
    }
}
