use std::sync::Arc;

use log::{debug, warn};

use tokio::io::{AsyncRead, AsyncWrite};

use tokio_fastcgi::{Request, Requests};

use crate::{
    connection::FastCGIConnectionID, handlers::RequestHandler, request::RequestMetadata,
    response::responder::Responder,
};

pub struct ConnectionProcessor {
    connection_id: FastCGIConnectionID,
    handler: Arc<dyn RequestHandler>,
    fastcgi_connection_configuration: crate::config::FastCGIConnectionConfiguration,
}

impl ConnectionProcessor {
    pub fn new(
        connection_id: FastCGIConnectionID,
        handler: Arc<dyn RequestHandler>,
        fastcgi_connection_configuration: &crate::config::FastCGIConnectionConfiguration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            handler,
            fastcgi_connection_configuration: fastcgi_connection_configuration.clone(),
        })
    }

    async fn process_one_request<W>(self: Arc<Self>, request: Request<W>)
    where
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        if let Err(err) = request
            .process(|request| async move {
                let metadata = RequestMetadata::from_fastcgi(self.connection_id, request.as_ref());

                debug!(
                    "connection_id {:?} request_id {} routing_path '{}'",
                    self.connection_id,
                    request.get_request_id(),
                    metadata.routing_path()
                );

                // The response is fully rendered before anything is written to stdout.
                let capture = self.handler.handle(&metadata).await;

                Responder::new(request, capture.into_http_response())
                    .respond()
                    .await
            })
            .await
        {
            warn!("request.process failed: err = {}", err);
        }
    }

    pub fn start<R, W>(self: Arc<Self>, split_socket: (R, W))
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        // One task per connection; it owns the socket until the stream ends.
        tokio::spawn(async move {
            let mut requests = Requests::from_split_socket(
                split_socket,
                *self
                    .fastcgi_connection_configuration
                    .max_concurrent_connections(),
                *self
                    .fastcgi_connection_configuration
                    .max_requests_per_connection(),
            );

            // Requests on one connection render concurrently.
            while let Ok(Some(request)) = requests.next().await {
                tokio::spawn(Arc::clone(&self).process_one_request(request));
            }
        });
    }
}
