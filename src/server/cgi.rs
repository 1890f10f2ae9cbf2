use std::sync::Arc;

use anyhow::Context;

use log::debug;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{handlers::RequestHandler, request::RequestMetadata, response::cgi};

const GATEWAY_INTERFACE: &str = "GATEWAY_INTERFACE";

/// The web server sets `GATEWAY_INTERFACE` when it runs us as a CGI script.
pub fn invoked_as_cgi() -> bool {
    std::env::var_os(GATEWAY_INTERFACE).is_some()
}

/// Handles the single request described by the process environment and writes
/// the framed response to stdout.
pub async fn serve(handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
    let request = RequestMetadata::from_cgi_environment();

    let mut stdout = tokio::io::stdout();

    serve_request(handler.as_ref(), &request, &mut stdout).await
}

async fn serve_request<W>(
    handler: &dyn RequestHandler,
    request: &RequestMetadata,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!("cgi request routing_path '{}'", request.routing_path());

    let capture = handler.handle(request).await;

    out.write_all(&cgi::frame(&capture))
        .await
        .context("error writing CGI response")?;
    out.flush().await.context("error flushing CGI response")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use http::{header::CONTENT_TYPE, StatusCode};

    use super::*;

    use crate::response::ResponseCapture;

    struct EchoPathHandler;

    #[async_trait]
    impl RequestHandler for EchoPathHandler {
        async fn handle(&self, request: &RequestMetadata) -> ResponseCapture {
            let mut capture = ResponseCapture::new();
            capture.set_status(StatusCode::ACCEPTED);
            capture.set_header(CONTENT_TYPE, "text/html; charset=utf-8");
            capture.write_bytes(format!("<p>{}</p>", request.routing_path()).as_bytes());
            capture
        }
    }

    #[tokio::test]
    async fn writes_framed_response() {
        let request = RequestMetadata::from_params([("REQUEST_URI", "/x")]);
        let mut out: Vec<u8> = Vec::new();

        serve_request(&EchoPathHandler, &request, &mut out)
            .await
            .unwrap();

        assert_eq!(
            out,
            b"Content-Type: text/html; charset=utf-8\r\n\r\n<p>/x</p>"
        );
    }
}
