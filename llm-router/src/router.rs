use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{info, warn};

use common::{error::AppError, utils::config::AppConfig};

use crate::{
    provider::{GenerateRequest, LlmProvider, OpenAiCompatProvider},
    response::LlmResponse,
    selection::{fallback_order, select_best, Candidate, ProviderWeights},
    stats::StatsSnapshot,
    task::{task_type_from_operation, TaskProfiles, TaskType},
};

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub task_type: Option<TaskType>,
    /// Operation name used for keyword-based task-type selection when no
    /// explicit task type is given.
    pub operation: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub healthy: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// Multi-provider generator with weighted selection and failover.
pub struct LlmRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    weights: HashMap<String, ProviderWeights>,
    profiles: TaskProfiles,
    embedding_model: String,
    embedding_dimensions: u32,
    embedding_cache: Cache<String, Vec<f32>>,
    global_timeout: Duration,
}

impl LlmRouter {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        weights: HashMap<String, ProviderWeights>,
        profiles: TaskProfiles,
        embedding_model: &str,
        embedding_dimensions: u32,
        embedding_cache_capacity: u64,
        embedding_cache_ttl: Duration,
        global_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            weights,
            profiles,
            embedding_model: embedding_model.to_string(),
            embedding_dimensions,
            embedding_cache: Cache::builder()
                .max_capacity(embedding_cache_capacity)
                .time_to_live(embedding_cache_ttl)
                .build(),
            global_timeout,
        }
    }

    /// Builds the provider set from configuration. A slot without an API key
    /// is skipped; at least one configured provider is required.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let global_timeout = Duration::from_secs_f64(config.llm_global_timeout_secs);

        // (name, slot, default base URL, default model, static weights)
        let slots = [
            (
                "gemini",
                &config.gemini,
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "gemini-2.0-flash",
                ProviderWeights {
                    base_weight: 4.0,
                    performance_multiplier: 1.0,
                    latency_threshold_ms: 800.0,
                    max_consecutive_failures: 1,
                },
            ),
            (
                "deepseek",
                &config.deepseek,
                "https://api.deepseek.com/v1",
                "deepseek-chat",
                ProviderWeights {
                    base_weight: 3.0,
                    performance_multiplier: 1.0,
                    latency_threshold_ms: 1_000.0,
                    max_consecutive_failures: 2,
                },
            ),
            (
                "openai",
                &config.openai,
                "https://api.openai.com/v1",
                "gpt-4o-mini",
                ProviderWeights {
                    base_weight: 2.0,
                    performance_multiplier: 1.0,
                    latency_threshold_ms: 2_000.0,
                    max_consecutive_failures: 2,
                },
            ),
            (
                "anthropic",
                &config.anthropic,
                "https://api.anthropic.com/v1",
                "claude-3-5-haiku-latest",
                ProviderWeights {
                    base_weight: 1.5,
                    performance_multiplier: 2.0,
                    latency_threshold_ms: 3_000.0,
                    max_consecutive_failures: 3,
                },
            ),
        ];

        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        let mut weights = HashMap::new();
        for (name, slot, default_base, default_model, slot_weights) in slots {
            let Some(api_key) = &slot.api_key else {
                continue;
            };
            let base_url = slot.base_url.as_deref().unwrap_or(default_base);
            let model = slot.model.as_deref().unwrap_or(default_model);
            let timeout = slot
                .timeout_secs
                .map_or(global_timeout, Duration::from_secs_f64);

            providers.push(Arc::new(OpenAiCompatProvider::new(
                name, api_key, base_url, model, timeout,
            )));
            weights.insert(name.to_string(), slot_weights);
            info!(provider = name, model, "registered LLM provider");
        }

        if providers.is_empty() {
            return Err(AppError::Config(
                "no LLM provider configured; set at least one api key".to_string(),
            ));
        }

        Ok(Self::new(
            providers,
            weights,
            TaskProfiles::new(&config.light_model, &config.heavy_model, global_timeout),
            &config.embedding_model,
            config.embedding_dimensions,
            config.embedding_cache_capacity,
            Duration::from_secs(config.embedding_cache_ttl_secs),
            global_timeout,
        ))
    }

    fn candidates(&self) -> Vec<Candidate<'_>> {
        self.providers
            .iter()
            .map(|provider| {
                let (healthy, stats) = match provider.stats().lock() {
                    Ok(mut guard) => (guard.is_healthy(), guard.snapshot()),
                    Err(_) => (false, StatsSnapshot {
                        total_requests: 0,
                        successes: 0,
                        failures: 0,
                        consecutive_failures: u32::MAX,
                        average_latency_ms: 0.0,
                        success_rate: 0.0,
                    }),
                };
                Candidate {
                    name: provider.name(),
                    healthy,
                    stats,
                    weights: self
                        .weights
                        .get(provider.name())
                        .copied()
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    fn provider_by_name(&self, name: &str) -> Option<&Arc<dyn LlmProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Routed generation: weighted primary selection, then the ordered
    /// fallback chain. The returned metadata records the total attempt count
    /// and whether a fallback answered.
    pub async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<LlmResponse, AppError> {
        let task_type = options.task_type.unwrap_or_else(|| {
            options
                .operation
                .as_deref()
                .map_or(TaskType::Heavy, task_type_from_operation)
        });
        let profile = self.profiles.get(task_type);

        let request = GenerateRequest {
            prompt: prompt.to_string(),
            system_prompt: options.system_prompt,
            max_tokens: options.max_tokens.unwrap_or(profile.max_tokens),
            temperature: options.temperature.unwrap_or(profile.temperature),
            model: Some(profile.model.clone()),
            // Task-type timeouts override the global soft-timeout
            timeout: if profile.timeout.is_zero() {
                self.global_timeout
            } else {
                profile.timeout
            },
        };

        let candidates = self.candidates();
        let Some(primary) = select_best(&candidates) else {
            return Err(AppError::LlmExhausted(
                "no healthy LLM provider available".to_string(),
            ));
        };

        let mut attempt = 0u32;
        let mut tried = Vec::new();
        let chain = std::iter::once(primary.clone())
            .chain(fallback_order(&candidates, Some(primary.as_str())));

        for name in chain {
            let Some(provider) = self.provider_by_name(&name) else {
                continue;
            };
            attempt += 1;
            match provider.generate(request.clone()).await {
                Ok(mut response) => {
                    response.attempt = attempt;
                    response.is_fallback = attempt > 1;
                    if response.is_fallback {
                        info!(
                            provider = %name,
                            attempt,
                            "fallback provider answered"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    warn!(provider = %name, attempt, error = %err, "provider failed; trying next");
                    tried.push(name);
                }
            }
        }

        Err(AppError::LlmExhausted(format!(
            "all providers failed after {attempt} attempts: [{}]",
            tried.join(", ")
        )))
    }

    /// Query embedding, cached for an hour keyed by `md5(model:text)`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let cache_key = format!(
            "{:x}",
            md5::compute(format!("{}:{}", self.embedding_model, text).as_bytes())
        );

        let model = self.embedding_model.clone();
        let dimensions = self.embedding_dimensions;
        self.embedding_cache
            .try_get_with(cache_key, async move {
                let candidates = self.candidates();
                let primary = select_best(&candidates).ok_or_else(|| {
                    AppError::LlmExhausted("no healthy LLM provider available".to_string())
                })?;

                let chain = std::iter::once(primary.clone())
                    .chain(fallback_order(&candidates, Some(primary.as_str())));
                let mut last_error = None;
                for name in chain {
                    let Some(provider) = self.provider_by_name(&name) else {
                        continue;
                    };
                    match provider.embed(&model, dimensions, text).await {
                        Ok(embedding) => return Ok(embedding),
                        Err(err) => {
                            warn!(provider = %name, error = %err, "embedding failed; trying next");
                            last_error = Some(err);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    AppError::LlmExhausted("embedding providers exhausted".to_string())
                }))
            })
            .await
            .map_err(|e: Arc<AppError>| AppError::LlmExhausted(e.to_string()))
    }

    pub fn embedding_dimensions(&self) -> u32 {
        self.embedding_dimensions
    }

    /// Per-provider health and stats for `/metrics`.
    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.providers
            .iter()
            .map(|provider| {
                let (healthy, stats) = match provider.stats().lock() {
                    Ok(mut guard) => (guard.is_healthy(), guard.snapshot()),
                    Err(_) => (false, StatsSnapshot {
                        total_requests: 0,
                        successes: 0,
                        failures: 0,
                        consecutive_failures: 0,
                        average_latency_ms: 0.0,
                        success_rate: 0.0,
                    }),
                };
                ProviderMetrics {
                    provider: provider.name().to_string(),
                    healthy,
                    stats,
                }
            })
            .collect()
    }
}
