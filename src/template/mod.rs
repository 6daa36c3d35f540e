//! Template rendering for stack provisioning requests.
//!
//! Templates see a small helper environment:
//!
//! - `array`: list of strings as a quoted, comma separated literal
//!   (`"a", "b"`);
//! - `ports`: list of port numbers joined by commas (`80,443`);
//! - `safe`: trusted, already-escaped fragment passed through verbatim;
//! - `upper`: the value with its first letter capitalized.

mod engine;

pub use engine::TemplateSet;

/// Renders a named template against a JSON context.
pub trait TemplateRenderer: Send + Sync + 'static {
    fn render(&self, template: &str, context: &serde_json::Value)
    -> Result<String, TemplateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    NotFound {
        template: String,
    },
    Syntax {
        template: String,
        reason: String,
    },
    MissingValue {
        template: String,
        path: String,
    },
    InvalidValue {
        template: String,
        action: String,
        reason: String,
    },
    Io {
        path: String,
        reason: String,
    },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { template } => write!(f, "template not found: {template}"),
            Self::Syntax { template, reason } => {
                write!(f, "template {template}: syntax error: {reason}")
            }
            Self::MissingValue { template, path } => {
                write!(f, "template {template}: no value for {path}")
            }
            Self::InvalidValue {
                template,
                action,
                reason,
            } => write!(f, "template {template}: {{{{ {action} }}}}: {reason}"),
            Self::Io { path, reason } => write!(f, "read template {path}: {reason}"),
        }
    }
}

impl std::error::Error for TemplateError {}

pub const HELPERS: [&str; 4] = ["array", "ports", "safe", "upper"];

/// `["a", "b"]` -> `"a", "b"`.
pub fn array(items: &[String]) -> String {
    items
        .iter()
        .map(|s| serde_json::Value::String(s.clone()).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `[80, 443]` -> `80,443`.
pub fn ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn upper(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn array_quotes_and_joins() {
        assert_eq!(
            array(&["us-east-1a".to_string(), "us-east-1b".to_string()]),
            r#""us-east-1a", "us-east-1b""#
        );
        assert_eq!(array(&[]), "");
        assert_eq!(array(&["say \"hi\"".to_string()]), r#""say \"hi\"""#);
    }

    #[test]
    fn ports_join_without_spaces() {
        assert_eq!(ports(&[80, 443, 5000]), "80,443,5000");
        assert_eq!(ports(&[]), "");
    }

    #[test]
    fn upper_capitalizes_first_letter_only() {
        assert_eq!(upper("web"), "Web");
        assert_eq!(upper("webWorker"), "WebWorker");
        assert_eq!(upper("é"), "É");
        assert_eq!(upper(""), "");
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }
}
