// src/config.rs
//
// Run configuration, loaded from TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SquabError};
use crate::pipeline::registry::Category;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
            input_cost_per_1k: 0.00015,
            output_cost_per_1k: 0.0006,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub cost_per_1k: f64,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            api_key: String::new(),
            base_url: None,
            cost_per_1k: 0.00002,
            timeout_secs: 60,
        }
    }
}

/// A worked example: template variables plus the expected answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FewShot {
    #[serde(flatten)]
    pub vars: BTreeMap<String, String>,
    pub assistant_answer: String,
}

/// Per-category knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorParams {
    pub threshold_similar_values: f64,
    pub max_patterns_per_table: usize,
    pub max_tests_per_pattern: usize,

    pub metadata_system_prompt: Option<String>,
    pub metadata_user_prompt: Option<String>,
    pub metadata_few_shots: Vec<FewShot>,

    pub question_system_prompt: Option<String>,
    pub question_user_prompt: Option<String>,
    pub question_few_shots: Vec<FewShot>,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            threshold_similar_values: 0.60,
            max_patterns_per_table: 10,
            max_tests_per_pattern: 7,
            metadata_system_prompt: None,
            metadata_user_prompt: None,
            metadata_few_shots: Vec::new(),
            question_system_prompt: None,
            question_user_prompt: None,
            question_few_shots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub unanswerable_marker: String,
    pub match_threshold: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            unanswerable_marker: "is unanswerable".to_string(),
            match_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub query_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub evaluation: EvaluationConfig,
    /// Keyed by category name, e.g. `[generators.scope]`.
    pub generators: BTreeMap<String, GeneratorParams>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            query_timeout_secs: 10,
            cache_dir: None,
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            evaluation: EvaluationConfig::default(),
            generators: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Explicit path, else the per-user config file if present, else defaults.
    /// API keys from the environment win over file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = default_config_path();
                if p.is_file() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: RunConfig = toml::from_str(raw)?;
        for name in cfg.generators.keys() {
            name.parse::<Category>()?;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        let llm_var = match self.llm.provider {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        };
        if let Ok(key) = std::env::var(llm_var) {
            if !key.trim().is_empty() {
                self.llm.api_key = key;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.embedding.api_key = key;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, p) in &self.generators {
            if !(0.0..=1.0).contains(&p.threshold_similar_values) {
                return Err(SquabError::Config(format!(
                    "generators.{name}.threshold_similar_values must be within [0, 1]"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.evaluation.match_threshold) {
            return Err(SquabError::Config(
                "evaluation.match_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Parameters for `category`, falling back to defaults.
    pub fn params_for(&self, category: Category) -> GeneratorParams {
        self.generators
            .iter()
            .find(|(name, _)| name.parse::<Category>().ok() == Some(category))
            .map(|(_, p)| p.clone())
            .unwrap_or_default()
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("squab/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = RunConfig::from_toml("").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.query_timeout_secs, 10);
    }

    #[test]
    fn generator_sections_accept_aliases() {
        let cfg = RunConfig::from_toml(
            r#"
            seed = 7

            [llm]
            provider = "anthropic"
            model = "claude-3-5-haiku-latest"

            [generators.vague]
            threshold_similar_values = 0.8

            [[generators.scope.metadata_few_shots]]
            "pattern_identification" = "[\"team\", \"player\"]"
            assistant_answer = "{\"entity\": \"team\", \"component\": \"player\"}"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.llm.provider, Provider::Anthropic);
        assert_eq!(cfg.params_for(Category::ColumnAmbiguity).threshold_similar_values, 0.8);
        assert_eq!(cfg.params_for(Category::Attachment).max_tests_per_pattern, 7);

        let scope = cfg.params_for(Category::Scope);
        assert_eq!(scope.metadata_few_shots.len(), 1);
        assert!(scope.metadata_few_shots[0].vars.contains_key("pattern_identification"));
    }

    #[test]
    fn unknown_generator_is_rejected() {
        let err = RunConfig::from_toml("[generators.nonsense]\n").unwrap_err();
        assert!(matches!(err, SquabError::UnknownCategory(_)));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let cfg = RunConfig::from_toml("[generators.attachment]\nthreshold_similar_values = 3.0\n").unwrap();
        assert!(matches!(cfg.validate(), Err(SquabError::Config(_))));
    }
}
