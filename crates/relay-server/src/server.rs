//! Relay WebSocket server.
//!
//! Listens on a TCP port, upgrades every accepted connection to WebSocket
//! and runs an independent session handler for it. Connections share no
//! state beyond the read-only [`RelayConfig`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::connection::serve_connection;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (port 0 = OS-assigned).
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 9000).into(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    bind: SocketAddr,
    relay: Arc<RelayConfig>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    /// Creates a server using the tokio clock.
    pub fn new(config: ServerConfig, relay: RelayConfig) -> Arc<Self> {
        Self::with_clock(config, relay, Arc::new(SystemClock))
    }

    /// Creates a server with an explicit time source.
    pub fn with_clock(config: ServerConfig, relay: RelayConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            bind: config.bind,
            relay: Arc::new(relay),
            clock,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and every open session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades a TCP connection to WebSocket and serves the session on it.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.relay.max_message_size);
        ws_config.max_frame_size = Some(self.relay.max_message_size);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        serve_connection(
            ws_stream,
            Arc::clone(&self.relay),
            Arc::clone(&self.clock),
            self.cancel.clone(),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ServerConfig {
        ServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
        }
    }

    #[test]
    fn default_bind() {
        assert_eq!(ServerConfig::default().bind.port(), 9000);
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let server = RelayServer::new(local(), RelayConfig::default());
        let server2 = Arc::clone(&server);

        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let port = server.port().await;
        assert!(port > 0, "should have bound to a dynamic port");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn port_is_zero_before_run() {
        let server = RelayServer::new(local(), RelayConfig::default());
        assert_eq!(server.port().await, 0);
        assert!(server.local_addr().await.is_none());
    }
}
