use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::observability::{TokenCounter, Tokenizer};
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub tokens: Arc<dyn TokenCounter>,
    pub ids: Arc<dyn IdGenerator>,
}

impl AppState {
    /// Production state: random ids and the `cl100k_base` tokenizer.
    ///
    /// # Errors
    ///
    /// Returns an error when the upstream transport cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        Self::with_collaborators(
            config,
            Arc::new(Tokenizer::cl100k()),
            Arc::new(RandomIdGenerator),
        )
    }

    /// State with injected token counter and id generator.
    ///
    /// # Errors
    ///
    /// Returns an error when the upstream transport cannot be built.
    pub fn with_collaborators(
        config: AppConfig,
        tokens: Arc<dyn TokenCounter>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&config.server, &config.upstream)?;
        Ok(Self {
            config,
            transport,
            tokens,
            ids,
        })
    }
}
