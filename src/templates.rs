use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use anyhow::Context;

use log::debug;

use minijinja::{
    value::Value, AutoEscape, Environment, ErrorKind, Output, State, UndefinedBehavior,
};

use serde::Serialize;

use crate::request::RequestMetadata;

#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct TemplateError {
    message: String,
}

impl TemplateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        Self { message }
    }
}

/// Values visible to every template.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    pub request_uri: &'a str,
    pub request: &'a RequestMetadata,
    pub data: &'a serde_json::Value,
}

pub trait TemplateEngine: Send + Sync {
    fn compile(&mut self, name: &str, source: String) -> Result<(), TemplateError>;

    /// Renders a compiled template into `out`. Output may be partially written
    /// when an error is returned.
    fn execute(
        &self,
        name: &str,
        context: &TemplateContext<'_>,
        out: &mut dyn io::Write,
    ) -> Result<(), TemplateError>;
}

pub trait TemplateLoader {
    fn load(&self, template_ref: &str) -> anyhow::Result<String>;
}

/// Reads templates from disk; relative references are resolved against
/// `templates_directory`.
pub struct FileTemplateLoader {
    templates_directory: PathBuf,
}

impl FileTemplateLoader {
    pub fn new(templates_directory: impl Into<PathBuf>) -> Self {
        Self {
            templates_directory: templates_directory.into(),
        }
    }

    fn resolve_path(&self, template_ref: &str) -> PathBuf {
        let path = Path::new(template_ref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.templates_directory.join(path)
        }
    }
}

impl TemplateLoader for FileTemplateLoader {
    fn load(&self, template_ref: &str) -> anyhow::Result<String> {
        let path = self.resolve_path(template_ref);

        debug!("loading template '{}' from {}", template_ref, path.display());

        std::fs::read_to_string(&path)
            .with_context(|| format!("error reading template file '{}'", path.display()))
    }
}

/// Escapes markup characters in auto-escaped output. Unlike the stock HTML
/// escaper, `/` is left alone so paths read verbatim, in plain strings and in
/// sequences or maps alike.
pub(crate) fn install_html_formatter(environment: &mut Environment<'_>) {
    environment.set_formatter(html_text_formatter);
}

fn html_text_formatter(
    out: &mut Output,
    state: &State,
    value: &Value,
) -> Result<(), minijinja::Error> {
    if !matches!(state.auto_escape(), AutoEscape::Html) || value.is_safe() {
        return minijinja::escape_formatter(out, state, value);
    }

    let escaped = match value.as_str() {
        Some(text) => escape_html_text(text),
        None => escape_html_text(&value.to_string()),
    };
    out.write_str(&escaped)
        .map_err(|_| minijinja::Error::new(ErrorKind::WriteFailure, "failed to write output"))
}

fn escape_html_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// String helpers under their Sprig names, for templates written against the
/// Go template function map.
fn install_sprig_helpers(environment: &mut Environment<'_>) {
    environment.add_filter("trimPrefix", |value: String, prefix: String| {
        match value.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.to_string(),
            None => value,
        }
    });
    environment.add_filter("trimSuffix", |value: String, suffix: String| {
        match value.strip_suffix(suffix.as_str()) {
            Some(rest) => rest.to_string(),
            None => value,
        }
    });
    environment.add_filter("hasPrefix", |value: String, prefix: String| {
        value.starts_with(prefix.as_str())
    });
    environment.add_filter("hasSuffix", |value: String, suffix: String| {
        value.ends_with(suffix.as_str())
    });
    environment.add_filter("contains", |value: String, needle: String| {
        value.contains(needle.as_str())
    });
    environment.add_filter("quote", |value: String| format!("{:?}", value));
    environment.add_filter("repeat", |value: String, count: usize| value.repeat(count));
}

pub struct MiniJinjaEngine {
    environment: Environment<'static>,
}

impl MiniJinjaEngine {
    /// Undefined values are errors; `.html`, `.htm` and `.xml` templates are
    /// auto-escaped.
    pub fn new() -> Self {
        let mut environment = Environment::new();
        environment.set_undefined_behavior(UndefinedBehavior::Strict);
        install_html_formatter(&mut environment);
        install_sprig_helpers(&mut environment);
        Self { environment }
    }
}

impl Default for MiniJinjaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for MiniJinjaEngine {
    fn compile(&mut self, name: &str, source: String) -> Result<(), TemplateError> {
        self.environment
            .add_template_owned(name.to_string(), source)?;
        Ok(())
    }

    fn execute(
        &self,
        name: &str,
        context: &TemplateContext<'_>,
        out: &mut dyn io::Write,
    ) -> Result<(), TemplateError> {
        let template = self.environment.get_template(name)?;
        template.render_to_write(context, out)?;
        Ok(())
    }
}
