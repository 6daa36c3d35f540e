use std::{collections::BTreeMap, fs, path::Path, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{HELPERS, TemplateError, TemplateRenderer, array, escape_html, ports, upper};

const TEMPLATE_EXTENSION: &str = "tmpl";

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("valid action regex"));

/// Templates held in memory, keyed by id (`app`, `service/s3`).
///
/// Actions are `{{ .path }}` or `{{ helper .path }}`. Plain values are
/// HTML-escaped; `safe` opts out.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(id.into(), body.into());
    }

    pub fn with(mut self, id: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(id, body);
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Loads every `*.tmpl` file under `dir`; `dir/service/s3.tmpl` becomes
    /// template `service/s3`.
    pub fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut set = Self::new();
        load_dir_into(&mut set, dir, "")?;
        debug!(dir = %dir.display(), templates = set.templates.len(), "loaded templates");
        Ok(set)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn load_dir_into(set: &mut TemplateSet, dir: &Path, prefix: &str) -> Result<(), TemplateError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| io_error(dir, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_error(dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() {
            load_dir_into(set, &path, &format!("{prefix}{name}/"))?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let body = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        set.insert(format!("{prefix}{stem}"), body);
    }
    Ok(())
}

impl TemplateRenderer for TemplateSet {
    fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError> {
        let body = self
            .templates
            .get(template)
            .ok_or_else(|| TemplateError::NotFound {
                template: template.to_string(),
            })?;
        render_body(template, body, context)
    }
}

fn render_body(template: &str, body: &str, context: &Value) -> Result<String, TemplateError> {
    let syntax = |reason: String| TemplateError::Syntax {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for caps in ACTION.captures_iter(body) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let text = &body[last..whole.start()];
        if text.contains("}}") {
            return Err(syntax(format!("unexpected }}}} before offset {}", whole.start())));
        }
        out.push_str(text);
        out.push_str(&render_action(template, inner.as_str().trim(), context)?);
        last = whole.end();
    }

    let rest = &body[last..];
    if rest.contains("{{") {
        return Err(syntax("unclosed action".to_string()));
    }
    if rest.contains("}}") {
        return Err(syntax("unexpected }}".to_string()));
    }
    out.push_str(rest);
    Ok(out)
}

fn render_action(template: &str, action: &str, context: &Value) -> Result<String, TemplateError> {
    let invalid = |reason: String| TemplateError::InvalidValue {
        template: template.to_string(),
        action: action.to_string(),
        reason,
    };

    let words: Vec<&str> = action.split_whitespace().collect();
    let (helper, path) = match words.as_slice() {
        [path] => (None, *path),
        [helper, path] => (Some(*helper), *path),
        _ => {
            return Err(TemplateError::Syntax {
                template: template.to_string(),
                reason: format!("malformed action {{{{ {action} }}}}"),
            });
        }
    };
    if let Some(helper) = helper.filter(|h| !HELPERS.contains(h)) {
        return Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: format!("unknown helper {helper:?}"),
        });
    }

    let value = lookup(template, path, context)?;
    match helper {
        None => match value {
            Value::String(s) => Ok(escape_html(s)),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            Value::Array(_) | Value::Object(_) => {
                Err(invalid("cannot print a list or object".to_string()))
            }
        },
        Some("array") => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid("expected a list of strings".to_string()))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("expected a list of strings".to_string()))?;
            Ok(array(&items))
        }
        Some("ports") => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid("expected a list of ports".to_string()))?
                .iter()
                .map(|v| v.as_u64().and_then(|n| u16::try_from(n).ok()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("expected a list of ports".to_string()))?;
            Ok(ports(&items))
        }
        Some("safe") => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| invalid("expected a string".to_string())),
        Some("upper") => value
            .as_str()
            .map(|s| escape_html(&upper(s)))
            .ok_or_else(|| invalid("expected a string".to_string())),
        Some(other) => Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: format!("unknown helper {other:?}"),
        }),
    }
}

fn lookup<'a>(template: &str, path: &str, context: &'a Value) -> Result<&'a Value, TemplateError> {
    let Some(rest) = path.strip_prefix('.') else {
        return Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: format!("expected a .path, got {path:?}"),
        });
    };
    if rest.is_empty() {
        return Ok(context);
    }

    let mut current = context;
    for segment in rest.split('.') {
        if segment.is_empty() {
            return Err(TemplateError::Syntax {
                template: template.to_string(),
                reason: format!("empty segment in {path:?}"),
            });
        }
        current = current
            .get(segment)
            .ok_or_else(|| TemplateError::MissingValue {
                template: template.to_string(),
                path: path.to_string(),
            })?;
    }
    Ok(current)
}
