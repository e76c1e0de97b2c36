//! Main server implementation.
//!
//! Binds the listener, serves the gateway router and tears every
//! connection down once shutdown is requested.

use std::future::IntoFuture;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use tradewire_gateway::{GatewayState, create_router};

use crate::config::{ConfigLoader, ServerConfig};
use crate::teardown::{StopReason, Teardown};

/// The gateway process.
pub struct GatewayServer {
    config: ServerConfig,
    teardown: Teardown,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("bind_address", &self.config.bind_address())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Creates a server with the default collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let state = Arc::new(GatewayState::with_defaults(config.gateway.clone()));
        Self::with_state(config, state)
    }

    /// Creates a server around an existing gateway state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_state(config: ServerConfig, state: Arc<GatewayState>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;
        Ok(Self {
            config,
            teardown: Teardown::new(state),
        })
    }

    /// Loads a configuration file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or is invalid.
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ServerError> {
        let mut config: ServerConfig = ConfigLoader::load_file(path)
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        config.apply_env_overrides();

        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// Returns the gateway state.
    #[must_use]
    pub fn state(&self) -> &Arc<GatewayState> {
        self.teardown.state()
    }

    /// Returns the teardown shared with the signal listener.
    #[must_use]
    pub fn teardown(&self) -> &Teardown {
        &self.teardown
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_address();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))
    }

    /// Binds, installs signal handlers and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;

        tokio::spawn(self.teardown.clone().listen_for_signals());

        self.serve(listener).await
    }

    /// Serves on `listener` until shutdown is initiated.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;
        info!(
            %local_addr,
            path = %self.state().config.path,
            "Tradewire gateway listening"
        );

        let router = create_router(self.state().clone());
        let teardown = self.teardown.clone();
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                teardown.requested().await;
            })
            .into_future();

        let drain_timeout = self.config.shutdown.timeout();
        let teardown = self.teardown.clone();
        tokio::select! {
            result = server => {
                result.map_err(|e| ServerError::RuntimeError(format!("HTTP server error: {e}")))?;
            }
            () = async move {
                teardown.requested().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(?drain_timeout, "HTTP drain timed out");
            }
        }

        self.teardown.finish();
        Ok(())
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.teardown.request(StopReason::Requested);
    }
}

/// Server error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Listener could not be bound.
    #[error("Bind error: {0}")]
    BindError(String),

    /// Logging could not be set up.
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Failure while serving.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}
