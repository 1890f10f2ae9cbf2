pub mod cgi;
mod processor;

use std::{fmt::Debug, sync::Arc};

use anyhow::Context;

use log::{debug, info};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, UnixListener},
};

use crate::{
    config::{ServerConfiguration, ServerType},
    connection::FastCGIConnectionIDFactory,
    handlers::RequestHandler,
    server::processor::ConnectionProcessor,
};

enum BoundListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// FastCGI listener serving every request through the shared handler.
pub struct Server {
    server_configuration: ServerConfiguration,
    handler: Arc<dyn RequestHandler>,
    connection_id_factory: FastCGIConnectionIDFactory,
}

impl Server {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        server_configuration: &ServerConfiguration,
    ) -> Self {
        Self {
            server_configuration: server_configuration.clone(),
            handler,
            connection_id_factory: FastCGIConnectionIDFactory::new(),
        }
    }

    async fn create_listener(&self) -> anyhow::Result<BoundListener> {
        let bind_address = self.server_configuration.bind_address();

        match self.server_configuration.server_type() {
            ServerType::TCP => {
                let listener = TcpListener::bind(bind_address).await.with_context(|| {
                    format!("TcpListener::bind error bind_address '{}'", bind_address)
                })?;

                let local_addr = listener.local_addr().context("local_addr error")?;
                info!("listening for FastCGI on tcp {:?}", local_addr);

                Ok(BoundListener::Tcp(listener))
            }
            ServerType::UNIX => {
                // A stale socket file from an earlier run blocks bind; a missing one is fine.
                let remove_result = tokio::fs::remove_file(bind_address).await;
                debug!("remove_result = {:?}", remove_result);

                let listener = UnixListener::bind(bind_address)
                    .with_context(|| format!("UnixListener::bind error path '{}'", bind_address))?;

                let local_addr = listener.local_addr().context("local_addr error")?;
                info!("listening for FastCGI on unix {:?}", local_addr);

                Ok(BoundListener::Unix(listener))
            }
        }
    }

    fn handle_connection<R, W>(&self, split_socket: (R, W), address: impl Debug)
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let connection_id = self.connection_id_factory.new_connection_id();

        debug!("connection_id {:?} from {:?}", connection_id, address);

        ConnectionProcessor::new(
            connection_id,
            Arc::clone(&self.handler),
            self.server_configuration.fastcgi_connection_configuration(),
        )
        .start(split_socket);
    }

    async fn accept_loop(&self, listener: BoundListener) -> anyhow::Result<()> {
        loop {
            match &listener {
                BoundListener::Tcp(listener) => {
                    let (stream, address) = listener
                        .accept()
                        .await
                        .context("establishing tcp connection failed")?;
                    self.handle_connection(stream.into_split(), address);
                }
                BoundListener::Unix(listener) => {
                    let (stream, address) = listener
                        .accept()
                        .await
                        .context("establishing unix connection failed")?;
                    self.handle_connection(stream.into_split(), address);
                }
            }
        }
    }

    /// Serves until the listener fails or ctrl-c is received.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self
            .create_listener()
            .await
            .context("Server::create_listener error")?;

        tokio::select! {
            result = self.accept_loop(listener) => result,
            signal = tokio::signal::ctrl_c() => {
                signal.context("ctrl_c signal error")?;
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        }
    }
}
