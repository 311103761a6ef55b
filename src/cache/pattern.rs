//! Redis-style glob matching for cache keys.
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes, matching the
//! whole key the way `SCAN MATCH` does.

use regex::Regex;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(glob))
            .map_err(|e| GatewayError::Cache(format!("Invalid key pattern '{}': {}", glob, e)))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&literal(escaped)),
                None => out.push_str(&literal('\\')),
            },
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut class = String::new();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '-' if !class.is_empty() && !class.ends_with('-') && chars.peek().is_some_and(|n| *n != ']') => class.push('-'),
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                class.push_str(&literal(escaped));
                            }
                        }
                        other => class.push_str(&literal(other)),
                    }
                }
                let negation = if negated { "^" } else { "" };
                if closed && !class.is_empty() {
                    out.push_str(&format!("[{}{}]", negation, class));
                } else {
                    // Unterminated or empty class: the bracket text is literal
                    out.push_str(&literal('['));
                    if negated {
                        out.push_str(&literal('^'));
                    }
                    out.push_str(&class);
                }
            }
            other => out.push_str(&literal(other)),
        }
    }

    out.push('$');
    out
}

fn literal(c: char) -> String {
    regex::escape(c.encode_utf8(&mut [0u8; 4]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(glob: &str, key: &str) -> bool {
        KeyPattern::new(glob).unwrap().matches(key)
    }

    #[test]
    fn star_and_question_mark() {
        assert!(matches("translation:*", "translation:abcd"));
        assert!(!matches("translation:*", "langdetect:abcd"));
        assert!(matches("*:zzzz", "translation:zzzz"));
        assert!(!matches("*:zzzz", "translation:aaaa"));
        assert!(matches("translation:a?cd", "translation:abcd"));
        assert!(!matches("translation:a?cd", "translation:acd"));
    }

    #[test]
    fn whole_key_must_match() {
        assert!(!matches("translation", "translation:abcd"));
        assert!(matches("translation", "translation"));
        assert!(!matches("*abc", "abcd"));
    }

    #[test]
    fn classes_and_escapes() {
        assert!(matches("k[ab]", "ka"));
        assert!(!matches("k[ab]", "kc"));
        assert!(matches("k[^ab]", "kc"));
        assert!(matches("k[a-c]", "kb"));
        assert!(!matches("k[a-c]", "kd"));
        assert!(matches(r"k\*", "k*"));
        assert!(!matches(r"k\*", "kx"));
        assert!(matches("a.b+c", "a.b+c"));
        assert!(!matches("a.b+c", "axbbc"));
    }

    #[test]
    fn unterminated_class_is_literal() {
        assert!(matches("k[ab", "k[ab"));
        assert!(!matches("k[ab", "ka"));
    }
}
