//! Language model abstraction and the response generator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::TEMPERATURE_RANGE;
use crate::error::{RagError, Result};
use crate::prompt::Prompt;

/// A chat-completion backend.
///
/// Implementations send the prompt's system instruction and user message and
/// return the raw answer text. They do not retry.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, used in error reports.
    fn name(&self) -> &str;

    /// Complete `prompt` at the given sampling temperature.
    async fn complete(&self, prompt: &Prompt, temperature: f32) -> Result<String>;
}

/// Invokes a [`LanguageModel`] with an assembled prompt.
#[derive(Clone)]
pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Generate an answer for `prompt`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] if `temperature` is outside `0.0..=2.0`
    /// - [`RagError::GenerationService`] for any model failure
    pub async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(RagError::InvalidArgument(format!(
                "temperature ({temperature}) must be within {TEMPERATURE_RANGE:?}"
            )));
        }

        debug!(model = %self.model.name(), units = prompt.units(), temperature, "generating");
        self.model.complete(prompt, temperature).await.map_err(|e| {
            error!(model = %self.model.name(), error = %e, "generation failed");
            match e {
                RagError::GenerationService { .. } => e,
                other => RagError::GenerationService {
                    provider: self.model.name().to_string(),
                    message: other.to_string(),
                },
            }
        })
    }
}
