mod pipeline;
pub mod route;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use crate::{
    reporter::{DebugMode, ErrorReporter},
    request::RequestMetadata,
    response::ResponseCapture,
    templates::{FileTemplateLoader, MiniJinjaEngine},
};

pub use pipeline::{load_templates, PipelineError, RequestPipeline};

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &RequestMetadata) -> ResponseCapture;
}

pub fn create_handler(
    configuration: &crate::config::Configuration,
    config_file: &Path,
    debug_mode: DebugMode,
) -> anyhow::Result<Arc<dyn RequestHandler>> {
    let loader = FileTemplateLoader::new(crate::config::templates_directory(config_file));

    let pipeline = RequestPipeline::new(
        configuration,
        &loader,
        Box::new(MiniJinjaEngine::new()),
        ErrorReporter::new(debug_mode),
    )?;

    Ok(Arc::new(pipeline))
}
