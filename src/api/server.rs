//! API Server
//!
//! Runs the REST surface until a shutdown signal arrives.

use crate::error::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::registry::InstanceRegistry;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub listen_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server for the instance registry
pub struct ApiServer {
    config: ApiServerConfig,
    registry: Arc<InstanceRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, registry: Arc<InstanceRegistry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            shutdown_tx,
        }
    }

    /// Run until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server");
        info!("  REST API: {}", self.config.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener; subscribes to shutdown before
    /// the returned future is first polled
    pub fn serve(
        &self,
        listener: tokio::net::TcpListener,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let app = RestRouter::new(self.registry.clone()).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        async move {
            if let Ok(addr) = listener.local_addr() {
                info!("REST API listening on {}", addr);
            }

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("REST server shutting down");
                })
                .await
                .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

            Ok(())
        }
    }

    /// Sender that triggers graceful shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::store::MemoryInstanceStore;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let registry = InstanceRegistry::new(
            RegistryConfig::default(),
            Arc::new(MemoryInstanceStore::new()),
        );
        let server = ApiServer::new(ApiServerConfig::default(), registry);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(server.serve(listener));
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
