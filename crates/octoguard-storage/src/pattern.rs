//! Glob-style key patterns.
//!
//! Only two wildcards are recognised: `*` matches any run of characters
//! (including none) and `?` matches exactly one character. Every other
//! character matches itself, so both backends agree on what a pattern means
//! even though Redis natively understands a richer syntax.

use regex::Regex;

use crate::StoreError;

/// A compiled, anchored key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the pattern is empty.
    pub fn new(glob: &str) -> Result<Self, StoreError> {
        if glob.is_empty() {
            return Err(StoreError::validation("key pattern must not be empty"));
        }

        // `(?s)` lets wildcards match newlines, as Redis globs match any byte.
        let mut source = String::with_capacity(glob.len() + 12);
        source.push_str("(?s)^");
        let mut literal = [0u8; 4];
        for ch in glob.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| StoreError::validation(format!("invalid key pattern '{glob}': {e}")))?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// Returns `true` if `key` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as written by the caller.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Renders the pattern for Redis `SCAN MATCH`, escaping the characters
    /// Redis would otherwise treat as wildcards or escapes.
    #[must_use]
    pub fn to_redis_glob(&self) -> String {
        let mut out = String::with_capacity(self.glob.len());
        for ch in self.glob.chars() {
            if matches!(ch, '[' | ']' | '\\' | '^') {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_any_run() {
        let pattern = KeyPattern::new("blocked_ip:*").unwrap();
        assert!(pattern.matches("blocked_ip:1.2.3.4"));
        assert!(pattern.matches("blocked_ip:"));
        assert!(!pattern.matches("violations:1.2.3.4"));
        assert!(!pattern.matches("xblocked_ip:1.2.3.4"));
    }

    #[test]
    fn test_wildcards_match_newlines() {
        let pattern = KeyPattern::new("blocked_ip:*").unwrap();
        assert!(pattern.matches("blocked_ip:a\nb"));

        let pattern = KeyPattern::new("csrf:?").unwrap();
        assert!(pattern.matches("csrf:\n"));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        let pattern = KeyPattern::new("csrf:??").unwrap();
        assert!(pattern.matches("csrf:ab"));
        assert!(!pattern.matches("csrf:a"));
        assert!(!pattern.matches("csrf:abc"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = KeyPattern::new("ip:10.0.0.1+[x]").unwrap();
        assert!(pattern.matches("ip:10.0.0.1+[x]"));
        assert!(!pattern.matches("ip:10a0b0c1+[x]"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let err = KeyPattern::new("").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_redis_glob_escaping() {
        let pattern = KeyPattern::new("audit:[a]*").unwrap();
        assert_eq!(pattern.to_redis_glob(), "audit:\\[a\\]*");
        assert_eq!(pattern.as_str(), "audit:[a]*");
    }
}
