use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::warn;

use common::error::AppError;

use crate::{response::LlmResponse, stats::ProviderStats};

/// In-provider retry attempts for transient failures.
const PROVIDER_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Task-type model override; `None` uses the provider's default model.
    pub model: Option<String>,
    pub timeout: Duration,
}

/// One LLM backend. Implementations own their transport and their call
/// statistics; the router owns selection and failover.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn stats(&self) -> &Mutex<ProviderStats>;

    async fn generate(&self, request: GenerateRequest) -> Result<LlmResponse, AppError>;

    async fn embed(
        &self,
        model: &str,
        dimensions: u32,
        input: &str,
    ) -> Result<Vec<f32>, AppError>;
}

fn is_transient(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::Reqwest(_) => true,
        OpenAIError::ApiError(api) => api
            .code
            .as_ref()
            .map(std::string::ToString::to_string)
            .is_some_and(|c| c == "rate_limit_exceeded" || c == "server_error")
            || api.message.contains("429")
            || api.message.contains("overloaded"),
        _ => false,
    }
}

/// Provider speaking the OpenAI-compatible chat/embeddings surface. Every
/// configured backend (OpenAI, Anthropic, Gemini, DeepSeek gateways) is an
/// instance of this with its own base URL, key, default model and timeout.
pub struct OpenAiCompatProvider {
    name: String,
    client: Client<OpenAIConfig>,
    default_model: String,
    default_timeout: Duration,
    stats: Mutex<ProviderStats>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &str,
        api_key: &str,
        base_url: &str,
        default_model: &str,
        default_timeout: Duration,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            name: name.to_string(),
            client: Client::with_config(config),
            default_model: default_model.to_string(),
            default_timeout,
            stats: Mutex::new(ProviderStats::default()),
        }
    }

    fn record(&self, started: Instant, success: bool) -> u64 {
        let duration_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        #[allow(clippy::cast_precision_loss)]
        let latency = duration_ms as f64;
        if let Ok(mut stats) = self.stats.lock() {
            if success {
                stats.record_success(latency);
            } else {
                stats.record_failure(latency);
            }
        }
        duration_ms
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &Mutex<ProviderStats> {
        &self.stats
    }

    async fn generate(&self, request: GenerateRequest) -> Result<LlmResponse, AppError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let call_timeout = if request.timeout.is_zero() {
            self.default_timeout
        } else {
            request.timeout
        };

        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatCompletionRequestSystemMessage::from(system.clone()).into());
        }
        messages.push(ChatCompletionRequestUserMessage::from(request.prompt.clone()).into());

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&model)
            .messages(messages)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()?;

        let mut last_error: Option<AppError> = None;
        for attempt in 1..=PROVIDER_MAX_ATTEMPTS {
            let started = Instant::now();
            let outcome = timeout(
                call_timeout,
                self.client.chat().create(chat_request.clone()),
            )
            .await;

            match outcome {
                Ok(Ok(response)) => {
                    let duration_ms = self.record(started, true);
                    let text = response
                        .choices
                        .first()
                        .and_then(|choice| choice.message.content.clone())
                        .ok_or_else(|| {
                            AppError::LLMParsing("No content found in LLM response".into())
                        })?;
                    let (tokens_in, tokens_out) = response
                        .usage
                        .map_or((None, None), |u| {
                            (Some(u.prompt_tokens), Some(u.completion_tokens))
                        });

                    return Ok(LlmResponse {
                        text,
                        model,
                        duration_ms,
                        tokens_in,
                        tokens_out,
                        provider: self.name.clone(),
                        attempt,
                        is_fallback: false,
                    });
                }
                Ok(Err(err)) => {
                    self.record(started, false);
                    let transient = is_transient(&err);
                    warn!(
                        provider = %self.name,
                        attempt,
                        transient,
                        error = %err,
                        "provider call failed"
                    );
                    last_error = Some(AppError::OpenAI(err));
                    if !transient || attempt == PROVIDER_MAX_ATTEMPTS {
                        break;
                    }
                    sleep(Duration::from_millis(200 * u64::from(attempt) * u64::from(attempt)))
                        .await;
                }
                Err(_elapsed) => {
                    self.record(started, false);
                    warn!(provider = %self.name, attempt, "provider call timed out");
                    last_error = Some(AppError::ExternalService(format!(
                        "{} timed out after {:?}",
                        self.name, call_timeout
                    )));
                    break;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::ExternalService(format!("{} failed without detail", self.name))
        }))
    }

    async fn embed(
        &self,
        model: &str,
        dimensions: u32,
        input: &str,
    ) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(dimensions)
            .input([input])
            .build()?;

        let started = Instant::now();
        let result = timeout(self.default_timeout, self.client.embeddings().create(request)).await;

        match result {
            Ok(Ok(response)) => {
                self.record(started, true);
                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
                    .embedding
                    .clone();
                Ok(embedding)
            }
            Ok(Err(err)) => {
                self.record(started, false);
                Err(AppError::OpenAI(err))
            }
            Err(_elapsed) => {
                self.record(started, false);
                Err(AppError::ExternalService(format!(
                    "{} embedding call timed out",
                    self.name
                )))
            }
        }
    }
}
