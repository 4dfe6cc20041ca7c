//! Literal `{placeholder}` substitution for command templates.

use indexmap::IndexMap;

use crate::error::TemplateError;

/// Named values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: IndexMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Layer `other` over `self`; values in `other` win.
    pub fn merged(&self, other: &TemplateVars) -> TemplateVars {
        let mut values = self.values.clone();
        for (k, v) in &other.values {
            values.insert(k.clone(), v.clone());
        }
        TemplateVars { values }
    }
}

/// Expand one template.
///
/// `{name}` is replaced by the value of `name`; `{{` and `}}` produce literal
/// braces. A placeholder with no value is an error, never an empty string.
pub fn expand(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            return Err(TemplateError::Unterminated {
                template: template.to_string(),
            });
        } else {
            let close = tail.find('}').ok_or_else(|| TemplateError::Unterminated {
                template: template.to_string(),
            })?;
            let name = &tail[1..close];
            let value = vars.get(name).ok_or_else(|| TemplateError::MissingValue {
                placeholder: name.to_string(),
                template: template.to_string(),
            })?;
            out.push_str(value);
            rest = &tail[close + 1..];
        }
    }
    out.push_str(rest);

    Ok(out)
}

/// Expand every template, failing on the first error before any is used.
pub fn expand_all<S: AsRef<str>>(
    templates: &[S],
    vars: &TemplateVars,
) -> Result<Vec<String>, TemplateError> {
    templates.iter().map(|t| expand(t.as_ref(), vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_substitutes_literally() {
        let vars = TemplateVars::new()
            .set("ip", "10.0.0.1")
            .set("sm", "255.255.255.0");
        assert_eq!(
            expand("ip address {ip} {sm}", &vars).unwrap(),
            "ip address 10.0.0.1 255.255.255.0"
        );
    }

    #[test]
    fn test_missing_placeholder() {
        let vars = TemplateVars::new().set("ip", "10.0.0.1");
        let err = expand("ip address {ip} {sm}", &vars).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingValue {
                placeholder: "sm".to_string(),
                template: "ip address {ip} {sm}".to_string(),
            }
        );
    }

    #[test]
    fn test_unterminated_placeholder() {
        let vars = TemplateVars::new();
        assert!(matches!(
            expand("hostname {hostname", &vars),
            Err(TemplateError::Unterminated { .. })
        ));
        assert!(matches!(
            expand("stray } brace", &vars),
            Err(TemplateError::Unterminated { .. })
        ));
    }

    #[test]
    fn test_escaped_braces_and_plain_text() {
        let vars = TemplateVars::new().set("x", "1");
        assert_eq!(expand("{{x}} is {x}", &vars).unwrap(), "{x} is 1");
        assert_eq!(expand("no shutdown", &vars).unwrap(), "no shutdown");
        assert_eq!(expand("", &vars).unwrap(), "");
    }

    #[test]
    fn test_expand_all_fails_before_returning_anything() {
        let vars = TemplateVars::new().set("interface", "Ethernet0/1");
        let result = expand_all(&["int {interface}", "ip address {ip} {sm}"], &vars);
        assert!(result.is_err());
    }

    #[test]
    fn test_merged_prefers_other() {
        let base = TemplateVars::new().set("a", "1").set("b", "2");
        let over = TemplateVars::new().set("b", "3");
        let merged = base.merged(&over);
        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
    }
}
