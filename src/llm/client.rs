// src/llm/client.rs

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::{EmbeddingConfig, LlmConfig, Provider};
use crate::error::ExternalCallError;
use crate::llm::{Completion, CompletionProvider, EmbeddingProvider, Embeddings, Message, Role};

/// Blocking HTTP client for chat completions and embeddings.
pub struct LlmClient {
    http: reqwest::blocking::Client,
    llm: LlmConfig,
    embedding: EmbeddingConfig,
}

impl LlmClient {
    pub fn new(llm: LlmConfig, embedding: EmbeddingConfig) -> Result<Self, ExternalCallError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs.max(embedding.timeout_secs)))
            .build()?;
        Ok(Self { http, llm, embedding })
    }

    fn post(
        &self,
        url: &str,
        headers: Vec<(&'static str, String)>,
        body: &Value,
    ) -> Result<Value, ExternalCallError> {
        let mut req = self.http.post(url).json(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send()?;
        let status = resp.status();
        let text = resp.text()?;

        if !status.is_success() {
            return Err(ExternalCallError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ExternalCallError::MalformedResponse(e.to_string()))
    }
}

/* ============================================================
   Completions
   ============================================================ */

fn build_request(cfg: &LlmConfig, messages: &[Message]) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "temperature": cfg.temperature,
                "max_tokens": cfg.max_tokens,
                "messages": messages,
            });

            (
                format!("{}/chat/completions", url.trim_end_matches('/')),
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".into());

            let system: Vec<&str> = messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
                .collect();
            let turns: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": cfg.max_tokens,
                "temperature": cfg.temperature,
                "system": system.join("\n\n"),
                "messages": turns,
            });

            (
                format!("{}/v1/messages", url.trim_end_matches('/')),
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: Provider, v: &Value) -> Result<String, ExternalCallError> {
    let text = match provider {
        Provider::OpenAI => v.pointer("/choices/0/message/content").and_then(|t| t.as_str()),
        Provider::Anthropic => v.pointer("/content/0/text").and_then(|t| t.as_str()),
    };

    text.map(str::to_owned)
        .ok_or_else(|| ExternalCallError::MalformedResponse(format!("no completion text in {v}")))
}

/// Token usage priced with the configured per-1k rates.
fn completion_cost(cfg: &LlmConfig, v: &Value) -> f64 {
    let (input, output) = match cfg.provider {
        Provider::OpenAI => ("/usage/prompt_tokens", "/usage/completion_tokens"),
        Provider::Anthropic => ("/usage/input_tokens", "/usage/output_tokens"),
    };
    let tokens = |p: &str| v.pointer(p).and_then(|t| t.as_u64()).unwrap_or(0) as f64;

    tokens(input) / 1000.0 * cfg.input_cost_per_1k + tokens(output) / 1000.0 * cfg.output_cost_per_1k
}

impl CompletionProvider for LlmClient {
    fn complete(&self, messages: &[Message]) -> Result<Completion, ExternalCallError> {
        let (url, headers, body) = build_request(&self.llm, messages);
        debug!(model = %self.llm.model, messages = messages.len(), "completion request");

        let json = self.post(&url, headers, &body)?;
        Ok(Completion {
            text: extract_text(self.llm.provider, &json)?,
            cost: completion_cost(&self.llm, &json),
        })
    }
}

/* ============================================================
   Embeddings (OpenAI-compatible)
   ============================================================ */

fn extract_vectors(v: &Value) -> Result<Vec<Vec<f64>>, ExternalCallError> {
    let data = v
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ExternalCallError::MalformedResponse("embedding response without data".into()))?;

    let mut items: Vec<(u64, Vec<f64>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(pos as u64);
        let vector = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ExternalCallError::MalformedResponse("embedding item without vector".into()))?
            .iter()
            .map(|x| x.as_f64().unwrap_or(0.0))
            .collect();
        items.push((index, vector));
    }
    items.sort_by_key(|(i, _)| *i);

    Ok(items.into_iter().map(|(_, v)| v).collect())
}

impl EmbeddingProvider for LlmClient {
    fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError> {
        let base = self
            .embedding
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".into());
        let url = format!("{}/embeddings", base.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.embedding.model, "input": inputs });

        let json = self.post(
            &url,
            vec![("Authorization", format!("Bearer {}", self.embedding.api_key))],
            &body,
        )?;

        let vectors = extract_vectors(&json)?;
        if vectors.len() != inputs.len() {
            return Err(ExternalCallError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }

        let tokens = json
            .pointer("/usage/total_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as f64;

        Ok(Embeddings {
            vectors,
            cost: tokens / 1000.0 * self.embedding.cost_per_1k,
        })
    }
}
