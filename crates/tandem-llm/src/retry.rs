use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use tandem_core::config::RetryConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::*;

/// A model client that retries failed requests.
///
/// With the default config (`max_retries = 1`) this implements the loop
/// controller's policy: at most one immediate retry, then the error
/// escalates as fatal for the run.
pub struct RetryingClient {
    inner: Box<dyn ModelClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn ModelClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &TandemError) -> bool {
    match e {
        TandemError::ModelInvocation(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        TandemError::ModelParse(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelClient for RetryingClient {
    fn invoke(
        &self,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let tools = tools.to_vec();
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            for attempt in 0..=max_retries {
                match self.inner.invoke(turns.clone(), &tools).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model request"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(TandemError::ModelInvocation("retries exhausted".into()))
        })
    }

    fn invoke_structured(
        &self,
        turns: Vec<Turn>,
        schema: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            for attempt in 0..=max_retries {
                match self
                    .inner
                    .invoke_structured(turns.clone(), schema.clone())
                    .await
                {
                    Ok(value) => return Ok(value),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying structured model request"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(TandemError::ModelInvocation("retries exhausted".into()))
        })
    }
}
