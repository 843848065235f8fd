//! Pattern matching utilities for prompt detection.

use regex::Regex;

/// Trait for prompt matching - regex by default, extensible for custom parsers.
pub trait PromptMatcher: Send + Sync {
    /// Returns byte offset where match ends, or None if no match.
    fn find_match(&self, text: &str) -> Option<usize>;

    /// Check if the text matches the pattern.
    fn is_match(&self, text: &str) -> bool {
        self.find_match(text).is_some()
    }
}

/// Regex-based prompt matcher (the default implementation).
impl PromptMatcher for Regex {
    fn find_match(&self, text: &str) -> Option<usize> {
        self.find(text).map(|m| m.end())
    }
}

/// Return the index of the first matcher that matches `text`.
///
/// Matchers are tried in slice order, so a lower index always wins over a
/// higher one, regardless of where in `text` each would match.
pub fn first_match<M: PromptMatcher>(matchers: &[M], text: &str) -> Option<usize> {
    matchers.iter().position(|m| m.is_match(text))
}

/// An ordered table of prompt matchers, each tagged with the role it plays
/// in a handshake.
///
/// Order encodes priority among simultaneously satisfiable patterns.
#[derive(Debug, Clone)]
pub struct PatternTable<R> {
    matchers: Vec<Regex>,
    roles: Vec<R>,
}

impl<R: Copy> PatternTable<R> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            matchers: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// Append a pattern with the lowest priority so far.
    pub fn with(mut self, pattern: &str, role: R) -> Result<Self, regex::Error> {
        self.matchers.push(Regex::new(pattern)?);
        self.roles.push(role);
        Ok(self)
    }

    /// Append an already compiled pattern.
    pub fn with_regex(mut self, pattern: Regex, role: R) -> Self {
        self.matchers.push(pattern);
        self.roles.push(role);
        self
    }

    /// The matchers in priority order.
    pub fn matchers(&self) -> &[Regex] {
        &self.matchers
    }

    /// The role of the matcher at `index`.
    pub fn role(&self, index: usize) -> Option<R> {
        self.roles.get(index).copied()
    }

    /// Classify `text` directly against the table.
    pub fn classify(&self, text: &str) -> Option<R> {
        first_match(&self.matchers, text).and_then(|i| self.role(i))
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl<R: Copy> Default for PatternTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the last line of `text` that contains anything besides whitespace.
pub fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Role {
        First,
        Second,
    }

    #[test]
    fn test_regex_prompt_matcher() {
        let pattern = Regex::new(r"\[root@guest ~\]#\s*$").unwrap();
        assert!(pattern.is_match("[root@guest ~]# "));
        assert!(pattern.find_match("[root@guest ~]#").is_some());
        assert!(!PromptMatcher::is_match(&pattern, "[user@guest ~]$ "));
    }

    #[test]
    fn test_priority_beats_position() {
        let table = PatternTable::new()
            .with(r"[Pp]assword", Role::First)
            .unwrap()
            .with(r"[Aa]re you sure", Role::Second)
            .unwrap();

        // "Are you sure" appears earlier in the text, but Password has priority.
        let text = "Are you sure you want to type your password";
        assert_eq!(table.classify(text), Some(Role::First));
        assert_eq!(table.classify("are you sure?"), Some(Role::Second));
        assert_eq!(table.classify("nothing here"), None);
    }

    #[test]
    fn test_role_lookup() {
        let table = PatternTable::new()
            .with("a", Role::First)
            .unwrap()
            .with_regex(Regex::new("b").unwrap(), Role::Second);
        assert_eq!(table.len(), 2);
        assert_eq!(table.role(1), Some(Role::Second));
        assert_eq!(table.role(2), None);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PatternTable::new().with("(unclosed", Role::First).is_err());
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("one\ntwo\n\n   \n"), "two");
        assert_eq!(last_line("login: "), "login: ");
        assert_eq!(last_line("\r\nPassword: "), "Password: ");
        assert_eq!(last_line(""), "");
    }
}
