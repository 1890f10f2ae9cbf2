use log::debug;

use regex::Regex;

use crate::config::TemplateRule;

#[derive(thiserror::Error, Debug)]
pub enum RouteTableError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no template configured for this request")]
    NoTemplateConfigured,
}

#[derive(Debug)]
pub struct PatternRule {
    pattern: Regex,
    template_ref: String,
}

/// Ordered pattern rules plus an optional default template.
///
/// Built once at startup and only read afterwards.
#[derive(Debug)]
pub struct RouteTable {
    rules: Vec<PatternRule>,
    default_template_ref: Option<String>,
}

impl RouteTable {
    pub fn new(
        template_rules: &[TemplateRule],
        default_template_ref: Option<String>,
    ) -> Result<Self, RouteTableError> {
        let mut rules = Vec::with_capacity(template_rules.len());

        for template_rule in template_rules {
            let pattern = Regex::new(template_rule.pattern()).map_err(|source| {
                RouteTableError::InvalidPattern {
                    pattern: template_rule.pattern().clone(),
                    source,
                }
            })?;

            rules.push(PatternRule {
                pattern,
                template_ref: template_rule.template().clone(),
            });
        }

        Ok(Self {
            rules,
            default_template_ref,
        })
    }

    /// First rule matching anywhere in `path` wins. Patterns are not anchored
    /// implicitly.
    pub fn resolve(&self, path: &str) -> Result<&str, ResolveError> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.pattern.is_match(path)) {
            debug!(
                "path '{}' matched pattern '{}' -> '{}'",
                path,
                rule.pattern.as_str(),
                rule.template_ref
            );
            return Ok(&rule.template_ref);
        }

        match &self.default_template_ref {
            Some(default_template_ref) => {
                debug!("path '{}' -> default '{}'", path, default_template_ref);
                Ok(default_template_ref)
            }
            None => Err(ResolveError::NoTemplateConfigured),
        }
    }

    /// Every template the table can resolve to, default first, without duplicates.
    pub fn template_refs(&self) -> Vec<&str> {
        let mut template_refs: Vec<&str> = Vec::with_capacity(self.rules.len() + 1);

        let candidates = self
            .default_template_ref
            .iter()
            .map(String::as_str)
            .chain(self.rules.iter().map(|rule| rule.template_ref.as_str()));

        for template_ref in candidates {
            if !template_refs.contains(&template_ref) {
                template_refs.push(template_ref);
            }
        }

        template_refs
    }
}
