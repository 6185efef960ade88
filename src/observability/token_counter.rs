use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

/// Counts tokens in generated or prompt text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u64;
}

/// Length heuristic used when no BPE encoder is available: `bytes / 4`.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    text.len() as u64 / 4
}

type EncodeFn = dyn Fn(&str) -> u64 + Send + Sync;

/// Token counter with an optional real encoder and a length fallback.
#[derive(Clone, Default)]
pub struct Tokenizer {
    encoder: Option<Arc<EncodeFn>>,
}

impl Tokenizer {
    /// A tokenizer with no encoder installed; every count uses
    /// [`estimate_tokens`].
    #[must_use]
    pub fn heuristic() -> Self {
        warn!("no BPE encoder installed, token counts use the length heuristic");
        Self { encoder: None }
    }

    /// The `cl100k_base` BPE, falling back to the length heuristic when the
    /// encoding cannot be loaded.
    #[must_use]
    pub fn cl100k() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => {
                info!("tokenizer initialized with cl100k_base encoding");
                Self::with_encoder(move |text| bpe.encode_with_special_tokens(text).len() as u64)
            }
            Err(err) => {
                warn!(error = %err, "failed to load cl100k_base encoding");
                Self::heuristic()
            }
        }
    }

    #[must_use]
    pub fn with_encoder(encoder: impl Fn(&str) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            encoder: Some(Arc::new(encoder)),
        }
    }

    #[must_use]
    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

impl TokenCounter for Tokenizer {
    fn count_tokens(&self, text: &str) -> u64 {
        match &self.encoder {
            Some(encode) => encode(text),
            None => estimate_tokens(text),
        }
    }
}

/// Token usage of one served request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: RequestUsage, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        total_tokens = usage.input_tokens + usage.output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
