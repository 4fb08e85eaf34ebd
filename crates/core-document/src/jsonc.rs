//! Comment stripping for JSON-with-comments sources.
//!
//! Supports `// …` line comments and `/* … */` block comments while honoring
//! string literals (with backslash escapes). Newlines inside comments are
//! preserved so that parse errors downstream still report the correct line.
//!
//! Stripping is a projection: a comment-free document is left unchanged and
//! stripping twice equals stripping once.

/// Strips comments from a JSONC source, preserving newlines.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                // Line comment: drop until newline, keep the newline.
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                // Block comment: drop content, keep embedded newlines.
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    if bytes[i] == b'\n' {
                        out.push('\n');
                    }
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Heuristic for "this string is a JSON document, not a file path": the
/// first non-whitespace character opens an object or array.
pub fn is_json_text(source: &str) -> bool {
    matches!(source.trim_start().chars().next(), Some('{') | Some('['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_block_comment_between_tokens() {
        let src = r#"{"a":/*x*/1,"b":"//not a comment"}"#;
        assert_eq!(strip_comments(src), r#"{"a":1,"b":"//not a comment"}"#);
    }

    #[test]
    fn keeps_newlines_for_line_fidelity() {
        let src = "{\n// a comment\n\"a\": 1 /* multi\nline */\n}";
        let stripped = strip_comments(src);
        assert_eq!(
            stripped.matches('\n').count(),
            src.matches('\n').count(),
            "newline count must survive stripping"
        );
        let parsed: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let src = r#"{"a": "quote \" // still string"}"#;
        assert_eq!(strip_comments(src), src);
    }

    #[test]
    fn stripping_is_idempotent() {
        let src = "{\"a\": 1, // c\n \"b\": [1,2] /* d */}";
        let once = strip_comments(src);
        assert_eq!(strip_comments(&once), once);
    }
}
