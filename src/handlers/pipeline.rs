use async_trait::async_trait;

use http::{
    header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
    StatusCode,
};

use log::{debug, info, warn};

use crate::{
    config::Configuration,
    handlers::{
        route::{ResolveError, RouteTable, RouteTableError},
        RequestHandler,
    },
    reporter::{Diagnostics, ErrorReporter},
    request::RequestMetadata,
    response::ResponseCapture,
    templates::{TemplateContext, TemplateEngine, TemplateLoader},
};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const NOT_FOUND_BODY: &str = "No template configured for this request\n";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidPattern(#[from] RouteTableError),

    #[error("failed to load template '{template_ref}': {reason}")]
    TemplateLoadFailure {
        template_ref: String,
        reason: String,
    },
}

/// Reads and compiles every template the route table can resolve to.
pub fn load_templates(
    route_table: &RouteTable,
    loader: &dyn TemplateLoader,
    engine: &mut dyn TemplateEngine,
) -> Result<(), PipelineError> {
    for template_ref in route_table.template_refs() {
        let source = loader
            .load(template_ref)
            .map_err(|err| PipelineError::TemplateLoadFailure {
                template_ref: template_ref.to_string(),
                reason: format!("{:#}", err),
            })?;

        engine
            .compile(template_ref, source)
            .map_err(|err| PipelineError::TemplateLoadFailure {
                template_ref: template_ref.to_string(),
                reason: err.to_string(),
            })?;

        info!("loaded template '{}'", template_ref);
    }

    Ok(())
}

/// Resolves, renders and commits one request at a time.
///
/// Route table, compiled templates and data are fixed at construction and only
/// read while serving, so one pipeline is shared by every request task.
pub struct RequestPipeline {
    route_table: RouteTable,
    templates: Box<dyn TemplateEngine>,
    data: serde_json::Value,
    error_reporter: ErrorReporter,
}

impl RequestPipeline {
    pub fn new(
        configuration: &Configuration,
        loader: &dyn TemplateLoader,
        mut templates: Box<dyn TemplateEngine>,
        error_reporter: ErrorReporter,
    ) -> Result<Self, PipelineError> {
        let route_table = RouteTable::new(
            configuration.templates(),
            configuration.default_template().clone(),
        )?;

        load_templates(&route_table, loader, templates.as_mut())?;

        Ok(Self {
            route_table,
            templates,
            data: configuration.data().clone(),
            error_reporter,
        })
    }

    pub fn process(&self, request: &RequestMetadata) -> ResponseCapture {
        let request_uri = request.routing_path();

        let template_ref = match self.route_table.resolve(request_uri) {
            Ok(template_ref) => template_ref,
            Err(ResolveError::NoTemplateConfigured) => {
                debug!("no template configured for '{}'", request_uri);
                return not_found_response();
            }
        };

        let context = TemplateContext {
            request_uri,
            request,
            data: &self.data,
        };

        let mut capture = ResponseCapture::new();

        match self.templates.execute(template_ref, &context, &mut capture) {
            Ok(()) => {
                capture.set_default_header(CONTENT_TYPE, HTML_CONTENT_TYPE);
                capture
            }
            Err(err) => {
                warn!(
                    "template execution error for '{}' request_uri '{}': {}",
                    template_ref, request_uri, err
                );

                let diagnostics = Diagnostics::new()
                    .with("Template Name", template_ref)
                    .with("Request URI", request_uri)
                    .with("Error", err.to_string());

                self.error_reporter.report(&diagnostics)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for RequestPipeline {
    async fn handle(&self, request: &RequestMetadata) -> ResponseCapture {
        self.process(request)
    }
}

fn not_found_response() -> ResponseCapture {
    let mut capture = ResponseCapture::new();
    capture.set_header(CONTENT_TYPE, "text/plain; charset=utf-8");
    capture.set_header(X_CONTENT_TYPE_OPTIONS, "nosniff");
    capture.set_status(StatusCode::NOT_FOUND);
    capture.write_bytes(NOT_FOUND_BODY.as_bytes());
    capture
}
