//! Local model inference: prompt construction, the runtime session, stream
//! aggregation and report extraction.

pub mod aggregator;
pub mod error;
pub mod llama_server;
pub mod parser;
pub mod prompt;
pub mod session;

pub use aggregator::{IMAGE_TOKEN_ESTIMATE, StreamAggregator, prefill_token_estimate};
pub use error::LlmError;
pub use llama_server::LlamaServerRuntime;
pub use parser::parse_report;
pub use prompt::build_prompt;
pub use session::{InferenceSession, ModelRuntime, Partial, PartialStream, is_model_installed};
