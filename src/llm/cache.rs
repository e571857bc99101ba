// src/llm/cache.rs
//
// Response cache keyed by a hash of the request. Replays text and cost.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ExternalCallError;
use crate::llm::{Completion, CompletionProvider, EmbeddingProvider, Embeddings, Message};

const CACHE_ABI_VERSION: &str = "v1-squab";

pub struct CachedCompletion<P> {
    inner: P,
    namespace: String,
    dir: Option<PathBuf>,
    // cache_key -> serialized response
    map: Mutex<HashMap<String, String>>,
}

impl<P> CachedCompletion<P> {
    /// `namespace` separates models sharing one cache directory.
    pub fn new(inner: P, namespace: impl Into<String>, dir: Option<PathBuf>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            dir,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn key(&self, kind: &str, parts: &[&str]) -> String {
        let mut h = Sha256::new();
        h.update(CACHE_ABI_VERSION.as_bytes());
        h.update(self.namespace.as_bytes());
        h.update(kind.as_bytes());
        for p in parts {
            h.update((p.len() as u64).to_le_bytes());
            h.update(p.as_bytes());
        }
        hex::encode(h.finalize())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = self
            .map
            .lock()
            .ok()
            .and_then(|m| m.get(key).cloned())
            .or_else(|| {
                let path = self.dir.as_ref()?.join(format!("{key}.json"));
                fs::read_to_string(path).ok()
            })?;
        serde_json::from_str(&hit).ok()
    }

    fn put<T: Serialize>(&self, key: String, value: &T) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };

        if let Some(dir) = &self.dir {
            let written = fs::create_dir_all(dir).and_then(|_| fs::write(dir.join(format!("{key}.json")), &raw));
            if let Err(e) = written {
                warn!(error = %e, "could not persist cached response");
            }
        }
        if let Ok(mut m) = self.map.lock() {
            m.insert(key, raw);
        }
    }
}

impl<P: CompletionProvider> CompletionProvider for CachedCompletion<P> {
    fn complete(&self, messages: &[Message]) -> Result<Completion, ExternalCallError> {
        let parts: Vec<String> = messages
            .iter()
            .map(|m| format!("{:?}\u{1f}{}", m.role, m.content))
            .collect();
        let key = self.key("complete", &parts.iter().map(String::as_str).collect::<Vec<_>>());

        if let Some(hit) = self.get::<Completion>(&key) {
            debug!(key = %key, "completion cache hit");
            return Ok(hit);
        }

        let fresh = self.inner.complete(messages)?;
        self.put(key, &fresh);
        Ok(fresh)
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for CachedCompletion<P> {
    fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError> {
        let key = self.key("embed", &inputs.iter().map(String::as_str).collect::<Vec<_>>());

        if let Some(hit) = self.get::<Embeddings>(&key) {
            debug!(key = %key, "embedding cache hit");
            return Ok(hit);
        }

        let fresh = self.inner.embed(inputs)?;
        self.put(key, &fresh);
        Ok(fresh)
    }
}
