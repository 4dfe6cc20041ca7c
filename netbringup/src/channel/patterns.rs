//! Prompt patterns: literal substrings or regexes, case-insensitive by default.

use std::fmt;

use regex::Regex;

/// Trailing `#` or `>` with optional whitespace, the generic shell prompt.
pub const SHELL_PROMPT: &str = r"[#>]\s*$";

/// A pattern to look for in accumulated device output.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Case-insensitive substring.
    Literal {
        /// The needle as written, for diagnostics.
        text: String,
        /// ASCII-lowercased needle.
        folded: String,
    },

    /// Regular expression. Compiled with `(?i)` unless it carries its own flags.
    Regex(Regex),
}

impl Pattern {
    /// Create a case-insensitive literal pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        let folded = text.to_ascii_lowercase();
        Self::Literal { text, folded }
    }

    /// Compile a regex pattern.
    ///
    /// A pattern that starts with an inline flag group such as `(?m)` or
    /// `(?-i:...)` is compiled as written. Anything else, including one that
    /// opens with a plain `(?:...)` or named `(?P<..>...)` group, is made
    /// case-insensitive.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        let source = if opens_with_flags(pattern) {
            pattern.to_string()
        } else {
            format!("(?i){pattern}")
        };
        Ok(Self::Regex(Regex::new(&source)?))
    }

    /// The standard shell prompt pattern.
    pub fn shell_prompt() -> Self {
        Self::Regex(Regex::new(SHELL_PROMPT).expect("shell prompt pattern is valid"))
    }

    /// Find the first match, returning `(start, end)` byte offsets.
    pub fn find_span(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Self::Literal { folded, .. } => {
                // ASCII folding keeps byte offsets valid in `haystack`.
                let lowered = haystack.to_ascii_lowercase();
                lowered
                    .find(folded.as_str())
                    .map(|start| (start, start + folded.len()))
            }
            Self::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    /// Byte offset where the first match ends.
    pub fn find_end(&self, haystack: &str) -> Option<usize> {
        self.find_span(haystack).map(|(_, end)| end)
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.find_span(haystack).is_some()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal { text, .. } => text,
            Self::Regex(re) => re.as_str(),
        }
    }
}

/// True when `pattern` begins with `(?flags)` or `(?flags:`.
fn opens_with_flags(pattern: &str) -> bool {
    let Some(rest) = pattern.strip_prefix("(?") else {
        return false;
    };
    let flags = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic() || *b == b'-')
        .count();
    flags > 0 && matches!(rest.as_bytes().get(flags), Some(b')' | b':'))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_is_case_insensitive() {
        let pattern = Pattern::literal("Login:");
        assert_eq!(pattern.find_span("firepower LOGIN: "), Some((10, 16)));
        assert!(!pattern.is_match("logon:"));
    }

    #[test]
    fn test_regex_defaults_to_case_insensitive() {
        let pattern = Pattern::regex(r"press <enter>").unwrap();
        assert!(pattern.is_match("Press <ENTER> to display the EULA"));
    }

    #[test]
    fn test_regex_with_inline_flags_compiled_as_written() {
        let pattern = Pattern::regex(r"(?m)^YES$").unwrap();
        assert!(pattern.is_match("agree?\nYES"));
        assert!(!pattern.is_match("agree?\nyes"));
    }

    #[test]
    fn test_regex_opening_with_plain_group_is_case_insensitive() {
        let pattern = Pattern::regex(r"(?:login|username):").unwrap();
        assert!(pattern.is_match("Username:"));

        let prompt = Pattern::regex(r"(?:Router|Switch)[#>]").unwrap();
        assert!(prompt.is_match("router#"));
    }

    #[test]
    fn test_regex_opening_with_named_group_is_case_insensitive() {
        let pattern = Pattern::regex(r"(?P<host>router)#").unwrap();
        assert!(pattern.is_match("Router#"));
    }

    #[test]
    fn test_regex_with_scoped_flags_compiled_as_written() {
        let pattern = Pattern::regex(r"(?-i:Router)#").unwrap();
        assert!(pattern.is_match("Router#"));
        assert!(!pattern.is_match("router#"));
    }

    #[test]
    fn test_shell_prompt() {
        let prompt = Pattern::shell_prompt();
        assert!(prompt.is_match("Router#"));
        assert!(prompt.is_match("Router(config)# "));
        assert!(prompt.is_match("firepower> \r\n"));
        assert!(!prompt.is_match("Password:"));
        assert!(!prompt.is_match("Router# show run\nBuilding"));
    }
}
