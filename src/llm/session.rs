//! Owned inference session over a pluggable model runtime.

use std::path::Path;

use crate::config::LlmConfig;
use crate::images::ImageInput;
use crate::llm::error::LlmError;

/// One incremental chunk of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial {
    pub text: String,
    /// Set on the final chunk of a generation
    pub done: bool,
}

impl Partial {
    pub fn new(text: impl Into<String>, done: bool) -> Self {
        Self {
            text: text.into(),
            done,
        }
    }
}

/// Blocking stream of partial results. Ends after the chunk with `done = true`.
pub type PartialStream<'a> = Box<dyn Iterator<Item = Result<Partial, LlmError>> + 'a>;

/// Native model capability. Implementations load or connect to a model and
/// stream generated text; the session decides when each call is allowed.
pub trait ModelRuntime {
    /// Load the model or apply new options. Called again to reconfigure.
    fn initialize(&mut self, config: &LlmConfig) -> Result<(), LlmError>;

    fn token_count(&self, text: &str) -> Result<usize, LlmError>;

    /// Start a generation for `prompt` plus `images`. Runs to completion once
    /// the returned stream is drained; there is no cancellation.
    fn generate<'a>(
        &'a mut self,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<PartialStream<'a>, LlmError>;

    /// Release the model. The runtime must be initialized again before use.
    fn dispose(&mut self) {}
}

/// An explicitly owned model session with `init` / `replace` / `dispose` lifecycle.
pub struct InferenceSession<R: ModelRuntime> {
    runtime: R,
    config: Option<LlmConfig>,
}

impl<R: ModelRuntime> InferenceSession<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            config: None,
        }
    }

    pub fn init(&mut self, config: LlmConfig) -> Result<(), LlmError> {
        tracing::info!(
            "Initializing model session ({} accelerator, top_k={}, top_p={}, temperature={})",
            config.accelerator,
            config.top_k,
            config.top_p,
            config.temperature
        );
        self.runtime.initialize(&config)?;
        self.config = Some(config);
        Ok(())
    }

    /// Tear down the current session and start a new one with `config`.
    /// Nothing is in flight while `&mut self` is held, so there is nothing to drain.
    pub fn replace(&mut self, config: LlmConfig) -> Result<(), LlmError> {
        self.dispose();
        self.init(config)
    }

    pub fn dispose(&mut self) {
        if self.config.take().is_some() {
            tracing::info!("Disposing model session");
            self.runtime.dispose();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_ref()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn token_count(&self, text: &str) -> Result<usize, LlmError> {
        if !self.is_ready() {
            return Err(LlmError::NotInitialized);
        }
        self.runtime.token_count(text)
    }

    pub fn run_inference<'a>(
        &'a mut self,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<PartialStream<'a>, LlmError> {
        let config = self.config.as_ref().ok_or(LlmError::NotInitialized)?;
        if images.len() > config.max_images {
            return Err(LlmError::TooManyImages {
                given: images.len(),
                max: config.max_images,
            });
        }
        tracing::debug!("Running inference with {} image(s)", images.len());
        self.runtime.generate(prompt, images)
    }
}

impl<R: ModelRuntime> Drop for InferenceSession<R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The model counts as installed when its file exists and is non-empty.
pub fn is_model_installed(model_path: &Path) -> bool {
    match std::fs::metadata(model_path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(e) => {
            tracing::debug!("Model file {:?} not readable: {}", model_path, e);
            false
        }
    }
}
