//! Scripted provider used by router, summarizer and orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use common::error::AppError;

use crate::{
    provider::{GenerateRequest, LlmProvider},
    response::LlmResponse,
    stats::ProviderStats,
};

/// Provider that replays a scripted sequence of outcomes. Once the script is
/// exhausted every call succeeds with `"ok"`.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    stats: Mutex<ProviderStats>,
    calls: AtomicUsize,
    fail_forever: bool,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<&str, &str>>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            stats: Mutex::new(ProviderStats::default()),
            calls: AtomicUsize::new(0),
            fail_forever: false,
        }
    }

    pub fn always_ok(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn always_failing(name: &str) -> Self {
        let mut provider = Self::new(name, Vec::new());
        provider.fail_forever = true;
        provider
    }

    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Deterministic pseudo-embedding so vector tests don't need a live model.
pub fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    let digest = md5::compute(input.as_bytes()).0;
    let mut out = Vec::with_capacity(dimensions);
    for i in 0..dimensions {
        let byte = digest[i % digest.len()];
        let centered = f32::from(byte) / 255.0 - 0.5;
        #[allow(clippy::cast_precision_loss)]
        let salted = centered + (i as f32 * 0.001);
        out.push(salted);
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &Mutex<ProviderStats> {
        &self.stats
    }

    async fn generate(&self, request: GenerateRequest) -> Result<LlmResponse, AppError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let next = self
            .script
            .lock()
            .map_err(|_| AppError::InternalError("script lock poisoned".into()))?
            .pop_front();

        let outcome = match next {
            Some(outcome) => outcome,
            None if self.fail_forever => Err("scripted permanent failure".to_string()),
            None => Ok("ok".to_string()),
        };

        match outcome {
            Ok(text) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_success(1.0);
                }
                Ok(LlmResponse {
                    text,
                    model: request
                        .model
                        .unwrap_or_else(|| "scripted-model".to_string()),
                    duration_ms: 1,
                    tokens_in: Some(10),
                    tokens_out: Some(20),
                    provider: self.name.clone(),
                    attempt: 1,
                    is_fallback: false,
                })
            }
            Err(message) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_failure(1.0);
                }
                Err(AppError::ExternalService(message))
            }
        }
    }

    async fn embed(
        &self,
        _model: &str,
        dimensions: u32,
        input: &str,
    ) -> Result<Vec<f32>, AppError> {
        if self.fail_forever {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_failure(1.0);
            }
            return Err(AppError::ExternalService(
                "scripted embedding failure".to_string(),
            ));
        }
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_success(1.0);
        }
        Ok(hashed_embedding(input, dimensions as usize))
    }
}
