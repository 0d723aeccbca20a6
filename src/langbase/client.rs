use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{Message, PipeRequest, PipeResponse};
use super::CompletionProvider;
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

/// HTTP client for the Langbase pipes endpoint.
///
/// Cheap to clone; the underlying `reqwest::Client` shares its pool.
#[derive(Clone)]
pub struct LangbaseClient {
    http: Client,
    endpoint: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        let base_url = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            endpoint: format!("{}/v1/pipes/run", base_url),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Run a pipe, retrying transient failures with exponential backoff.
    ///
    /// 4xx responses other than 429 are not retried. A non-retryable API
    /// error on the first attempt is returned as is.
    pub async fn run_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let max_attempts = self.request_config.max_retries + 1;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            if attempts > 0 {
                let delay = self.backoff(attempts);
                warn!(
                    pipe = %request.name,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis(),
                    "Backing off before retrying pipe"
                );
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            let started = Instant::now();
            match self.send_once(&request).await {
                Ok(response) => {
                    info!(
                        pipe = %request.name,
                        model = ?response.model(),
                        tokens = ?response.total_tokens(),
                        latency_ms = started.elapsed().as_millis(),
                        "Pipe completed"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        pipe = %request.name,
                        attempt = attempts,
                        latency_ms = started.elapsed().as_millis(),
                        error = %e,
                        "Pipe call failed"
                    );
                    let retryable = is_retryable(&e);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e @ LangbaseError::Api { .. }) if attempts == 1 => Err(e),
            other => Err(LangbaseError::Unavailable {
                message: other.map_or_else(|| "no attempt was made".to_string(), |e| e.to_string()),
                retries: attempts.saturating_sub(1),
            }),
        }
    }

    /// Delay before `attempt`, doubling from `retry_delay_ms` and saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.request_config.retry_delay_ms.saturating_mul(factor))
    }

    async fn send_once(&self, request: &PipeRequest) -> LangbaseResult<PipeResponse> {
        debug!(pipe = %request.name, messages = request.messages.len(), "Posting to pipe");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| LangbaseError::InvalidResponse {
                    message: format!("Unreadable pipe response: {}", e),
                })?;

        if !parsed.success {
            return Err(LangbaseError::InvalidResponse {
                message: format!("Pipe {} reported success=false", request.name),
            });
        }
        Ok(parsed)
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_retryable(err: &LangbaseError) -> bool {
    match err {
        LangbaseError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => true,
    }
}

#[async_trait]
impl CompletionProvider for LangbaseClient {
    async fn complete(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String> {
        let response = self.run_pipe(PipeRequest::new(pipe, messages)).await?;
        Ok(response.completion)
    }
}
