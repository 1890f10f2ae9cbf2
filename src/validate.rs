use std::io;

use log::info;

use crate::{
    config::Configuration,
    handlers::{load_templates, route::RouteTable, PipelineError},
    request::RequestMetadata,
    templates::{TemplateContext, TemplateEngine, TemplateError, TemplateLoader},
};

const SAMPLE_REQUEST_URI: &str = "/test/path";

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Load(#[from] PipelineError),

    #[error("template '{template_ref}' failed to execute with sample data: {source}")]
    Execute {
        template_ref: String,
        #[source]
        source: TemplateError,
    },
}

fn sample_request(request_uri: &str) -> RequestMetadata {
    RequestMetadata::from_params([
        ("REQUEST_URI", request_uri),
        ("REQUEST_METHOD", "GET"),
        ("HTTP_HOST", "example.com"),
        ("HTTP_USER_AGENT", "Template-Validator/1.0"),
    ])
}

/// Compiles every pattern and template, then renders each template once against
/// a sample request. Output is discarded.
pub fn validate_templates(
    configuration: &Configuration,
    loader: &dyn TemplateLoader,
    engine: &mut dyn TemplateEngine,
) -> Result<(), ValidationError> {
    let route_table = RouteTable::new(
        configuration.templates(),
        configuration.default_template().clone(),
    )
    .map_err(PipelineError::from)?;

    load_templates(&route_table, loader, engine)?;

    let default_check = configuration
        .default_template()
        .as_deref()
        .map(|template_ref| (template_ref, SAMPLE_REQUEST_URI, None));

    let rule_checks = configuration.templates().iter().map(|rule| {
        (
            rule.template().as_str(),
            rule.test_uri().as_deref().unwrap_or(SAMPLE_REQUEST_URI),
            Some(rule.pattern().as_str()),
        )
    });

    for (template_ref, request_uri, pattern) in default_check.into_iter().chain(rule_checks) {
        let request = sample_request(request_uri);
        let context = TemplateContext {
            request_uri,
            request: &request,
            data: configuration.data(),
        };

        engine
            .execute(template_ref, &context, &mut io::sink())
            .map_err(|source| ValidationError::Execute {
                template_ref: template_ref.to_string(),
                source,
            })?;

        match pattern {
            Some(pattern) => info!(
                "✓ Template '{}' (pattern: {}) is valid",
                template_ref, pattern
            ),
            None => info!("✓ Default template '{}' is valid", template_ref),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    use crate::{
        config::{parse_configuration, read_configuration, templates_directory, ConfigurationFormat},
        templates::{FileTemplateLoader, MiniJinjaEngine},
    };

    struct MemoryTemplateLoader(HashMap<&'static str, &'static str>);

    impl TemplateLoader for MemoryTemplateLoader {
        fn load(&self, template_ref: &str) -> anyhow::Result<String> {
            self.0
                .get(template_ref)
                .map(|source| source.to_string())
                .ok_or_else(|| anyhow::anyhow!("no such template '{}'", template_ref))
        }
    }

    fn configuration(yaml: &str) -> Configuration {
        parse_configuration(yaml.as_bytes(), ConfigurationFormat::Yaml).unwrap()
    }

    #[test]
    fn valid_templates_pass() {
        let configuration = configuration(
            r#"
default_template: default.html
templates:
  - pattern: "^/blog/"
    template: blog.html
    test_uri: /blog/123
data:
  site: example
"#,
        );
        let loader = MemoryTemplateLoader(HashMap::from([
            ("default.html", "{{ data.site }} {{ request.http_headers[\"user-agent\"] }}"),
            ("blog.html", "{% if request_uri != \"/blog/123\" %}{{ fail.here }}{% endif %}"),
        ]));

        let result = validate_templates(&configuration, &loader, &mut MiniJinjaEngine::new());

        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn execution_failure_names_template() {
        let configuration = configuration(
            r#"
templates:
  - pattern: "^/api/"
    template: api.html
"#,
        );
        let loader = MemoryTemplateLoader(HashMap::from([("api.html", "{{ data.missing }}")]));

        let err = validate_templates(&configuration, &loader, &mut MiniJinjaEngine::new())
            .unwrap_err();

        assert!(matches!(
            &err,
            ValidationError::Execute { template_ref, .. } if template_ref == "api.html"
        ));
    }

    #[test]
    fn invalid_pattern_fails() {
        let configuration = configuration(
            r#"
templates:
  - pattern: "(unclosed"
    template: api.html
"#,
        );
        let loader = MemoryTemplateLoader(HashMap::new());

        let err = validate_templates(&configuration, &loader, &mut MiniJinjaEngine::new())
            .unwrap_err();

        assert!(matches!(
            err,
            ValidationError::Load(PipelineError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn demo_configuration_is_valid() {
        let config_file =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/config.yaml");
        let configuration = read_configuration(&config_file).await.unwrap();
        let loader = FileTemplateLoader::new(templates_directory(&config_file));

        let result = validate_templates(&configuration, &loader, &mut MiniJinjaEngine::new());

        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn sample_request_looks_like_a_browser_request() {
        let request = sample_request("/test/path");

        assert_eq!(request.routing_path(), "/test/path");
        assert_eq!(request.http_headers()["host"], "example.com");
        assert_eq!(request.method().as_deref(), Some("GET"));
        assert_eq!(
            request.http_headers()["user-agent"],
            "Template-Validator/1.0"
        );
    }
}
