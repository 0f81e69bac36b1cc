//! Repair cascade for model-produced JSON
//!
//! Extraction output arrives wrapped in markdown fences, with single-quoted
//! strings, trailing commas or bare property names. Parsing strips the
//! wrapping, tries a normal parse, then applies the repairs and retries.
//! Anything still unparseable is the caller's signal to skip the chunk.

use serde_json::Value;

/// Coerce raw model output into a JSON value, or give up
pub fn parse_llm_json(raw: &str) -> Option<Value> {
    let stripped = strip_code_fences(raw);
    let sliced = brace_slice(&stripped)?;

    if let Ok(value) = serde_json::from_str(sliced) {
        return Some(value);
    }

    let repaired = remove_trailing_commas(&quote_bare_keys(&fix_single_quotes(sliced)));
    serde_json::from_str(&repaired).ok()
}

/// Drop markdown fence lines (```json ... ```)
fn strip_code_fences(s: &str) -> String {
    s.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slice from the first `{` to the last `}`, dropping surrounding prose
fn brace_slice(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

/// Convert single-quoted strings to double-quoted ones
fn fix_single_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_double = false;

    while i < chars.len() {
        let c = chars[i];

        if in_double {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_double = true;
                out.push(c);
                i += 1;
            }
            '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    if d == '\\' && i + 1 < chars.len() {
                        if chars[i + 1] == '\'' {
                            out.push('\'');
                        } else {
                            out.push(d);
                            out.push(chars[i + 1]);
                        }
                        i += 2;
                        continue;
                    }
                    if d == '\'' {
                        break;
                    }
                    if d == '"' {
                        out.push('\\');
                    }
                    out.push(d);
                    i += 1;
                }
                out.push('"');
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Remove commas directly before a closing brace or bracket
fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Quote bare property names (`{name: ...}` becomes `{"name": ...}`)
fn quote_bare_keys(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut i = 0;
    let mut in_string = false;
    let mut expecting_key = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
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
            '{' | ',' => {
                out.push(c);
                expecting_key = true;
                i += 1;
            }
            _ if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            _ if expecting_key && (c.is_alphabetic() || c == '_') => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }

                let ident: String = chars[start..i].iter().collect();
                if j < chars.len() && chars[j] == ':' {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                expecting_key = false;
            }
            _ => {
                out.push(c);
                expecting_key = false;
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_json_passes_through() {
        let value = parse_llm_json(r#"{"entities": [], "relationships": []}"#).unwrap();
        assert_eq!(value, json!({"entities": [], "relationships": []}));
    }

    #[test]
    fn test_strips_markdown_fences() {
        let raw = "```json\n{\"entities\": []}\n```";
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"entities": []}));
    }

    #[test]
    fn test_ignores_surrounding_prose() {
        let raw = "Here is the extraction you asked for:\n{\"a\": 1}\nHope that helps!";
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_repairs_single_quotes() {
        let raw = "{'name': 'Kant', 'type': 'PERSON'}";
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"name": "Kant", "type": "PERSON"}));
    }

    #[test]
    fn test_repairs_trailing_commas() {
        let raw = r#"{"entities": [{"name": "Kant",},],}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"entities": [{"name": "Kant"}]}));
    }

    #[test]
    fn test_repairs_bare_keys() {
        let raw = r#"{entities: [{name: "Kant", type: "PERSON"}]}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(
            value,
            json!({"entities": [{"name": "Kant", "type": "PERSON"}]})
        );
    }

    #[test]
    fn test_repairs_combined_damage() {
        let raw = "```json\n{entities: [{'name': 'Hume', type: 'PERSON',},],}\n```";
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(
            value,
            json!({"entities": [{"name": "Hume", "type": "PERSON"}]})
        );
    }

    #[test]
    fn test_escaped_quote_inside_single_quoted_string() {
        let raw = r#"{'name': 'Kant\'s Critique'}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"name": "Kant's Critique"}));
    }

    #[test]
    fn test_double_quote_inside_single_quoted_string() {
        let raw = r#"{'quote': 'he said "no"'}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"quote": "he said \"no\""}));
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_llm_json("no json here at all").is_none());
        assert!(parse_llm_json("{{{{").is_none());
        assert!(parse_llm_json("").is_none());
    }

    #[test]
    fn test_commas_inside_strings_untouched() {
        let raw = r#"{"description": "a, b, and c,"}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"description": "a, b, and c,"}));
    }

    #[test]
    fn test_bare_words_in_values_untouched() {
        let raw = r#"{"flag": true, "nothing": null}"#;
        let value = parse_llm_json(raw).unwrap();
        assert_eq!(value, json!({"flag": true, "nothing": null}));
    }
}
