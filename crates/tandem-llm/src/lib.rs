pub mod providers;
pub mod retry;
pub mod scripted;

use tandem_core::config::ModelConfig;
use tandem_core::traits::ModelClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use scripted::{ClosureClient, ScriptedClient};

/// Create a model client based on the provider name, wrapped with the
/// configured retry policy.
pub fn create_client(config: &ModelConfig) -> Box<dyn ModelClient> {
    // Every supported provider speaks the OpenAI-compatible wire format;
    // base_url selects Ollama, Groq, OpenRouter, vLLM, etc.
    let inner: Box<dyn ModelClient> = Box::new(OpenAiClient::new(config.clone()));

    let retry = config.retry.clone().unwrap_or_default();
    Box::new(RetryingClient::new(inner, retry))
}
