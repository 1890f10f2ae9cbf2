use std::{fmt::Write, sync::Arc};

use log::{debug, warn};

use tokio::io::AsyncWrite;

use tokio_fastcgi::{Request, RequestResult};

use crate::response::HttpResponse;

#[derive(thiserror::Error, Debug)]
enum SendResponseError {
    #[error("build header string error: {0}")]
    BuildHeaderStringError(#[from] std::fmt::Error),

    #[error("tokio_fastcgi write error: {0}")]
    TokioFastCGIWriteError(#[from] tokio_fastcgi::Error),
}

/// Writes a committed response to the FastCGI stdout stream.
pub struct Responder<W>
where
    W: AsyncWrite + Unpin,
{
    request: Arc<Request<W>>,
    response: HttpResponse,
}

impl<W> Responder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(request: Arc<Request<W>>, response: HttpResponse) -> Self {
        Self { request, response }
    }

    pub(crate) fn build_header_string(response: &HttpResponse) -> Result<String, std::fmt::Error> {
        let mut header_string = String::new();

        write!(
            header_string,
            "Status: {} {}\r\n",
            response.status().as_u16(),
            response.status().canonical_reason().unwrap_or("[Unknown]")
        )?;

        for (key, value) in response.headers() {
            write!(
                header_string,
                "{}: {}\r\n",
                key.as_str(),
                value.to_str().unwrap_or("[Unknown]")
            )?;
        }

        header_string.push_str("\r\n");

        Ok(header_string)
    }

    async fn internal_send_response(self) -> Result<(), SendResponseError> {
        let mut stdout = self.request.get_stdout();

        let header_string = Self::build_header_string(&self.response)?;

        stdout.write(header_string.as_bytes()).await?;

        let body = self.response.into_body();
        if !body.is_empty() {
            stdout.write(&body).await?;
        }

        Ok(())
    }

    pub async fn respond(self) -> RequestResult {
        debug!(
            "respond status = {} body_len = {}",
            self.response.status(),
            self.response.body().len()
        );

        match self.internal_send_response().await {
            Ok(_) => RequestResult::Complete(0),
            Err(err) => {
                warn!("send response failed: {}", err);
                RequestResult::Complete(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{header::CONTENT_TYPE, StatusCode};

    use tokio::net::unix::OwnedWriteHalf;

    use super::*;

    use crate::response::ResponseCapture;

    #[test]
    fn header_string_has_status_headers_and_blank_line() {
        let mut capture = ResponseCapture::new();
        capture.set_status(StatusCode::NOT_FOUND);
        capture.set_header(CONTENT_TYPE, "text/plain; charset=utf-8");
        let response = capture.into_http_response();

        let header_string = Responder::<OwnedWriteHalf>::build_header_string(&response).unwrap();

        assert_eq!(
            header_string,
            "Status: 404 Not Found\r\ncontent-type: text/plain; charset=utf-8\r\n\r\n"
        );
    }
}
