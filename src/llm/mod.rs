// src/llm/mod.rs
//
// Text-generation and embedding collaborators.

pub mod cache;
pub mod client;
pub mod parse;
pub mod prompt;

use serde::{Deserialize, Serialize};

use crate::error::ExternalCallError;

pub use cache::CachedCompletion;
pub use client::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f64>>,
    pub cost: f64,
}

pub trait CompletionProvider {
    fn complete(&self, messages: &[Message]) -> Result<Completion, ExternalCallError>;
}

pub trait EmbeddingProvider {
    fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError>;
}
