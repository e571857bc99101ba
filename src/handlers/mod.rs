// src/handlers/mod.rs
//
// Per-category stage handlers and the context they share.

pub mod pattern_identification;
pub mod relational_metadata;
pub mod test_generation;

use std::time::Duration;

use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::baseline::BaselineQueryGenerator;
use crate::config::GeneratorParams;
use crate::connector::TableConnector;
use crate::error::{ExternalCallError, SquabError};
use crate::line::Line;
use crate::llm::prompt::Vars;
use crate::llm::{Completion, CompletionProvider, EmbeddingProvider, Embeddings, Message};
use crate::pipeline::registry::Category;
use crate::pipeline::{Fanout, GenerationStep};

/// Collaborators and knobs for one category run.
///
/// The rng is seeded once per category so a run is reproducible from
/// `{database, seed, params}`.
pub struct HandlerContext<'a> {
    pub category: Category,
    pub connector: &'a dyn TableConnector,
    pub completion: Option<&'a dyn CompletionProvider>,
    pub embedder: Option<&'a dyn EmbeddingProvider>,
    pub baseline: &'a dyn BaselineQueryGenerator,
    pub params: &'a GeneratorParams,
    pub query_timeout: Duration,
    pub rng: ChaCha8Rng,
}

impl HandlerContext<'_> {
    pub fn complete(&self, messages: &[Message]) -> Result<Completion, ExternalCallError> {
        self.completion
            .ok_or(ExternalCallError::MissingProvider)?
            .complete(messages)
    }

    pub fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError> {
        self.embedder
            .ok_or(ExternalCallError::MissingProvider)?
            .embed(inputs)
    }
}

/// Record an expected failure with zero cost for `step`.
pub(crate) fn fail(mut line: Line, step: GenerationStep, reason: impl Into<String>) -> Fanout {
    line.charge(step, 0.0);
    line.mark_failed(step, reason);
    line.into()
}

/// Convert a collaborator failure into a failure marker.
pub(crate) fn external_failure(line: Line, step: GenerationStep, err: ExternalCallError) -> Fanout {
    warn!(
        stage = step.key(),
        table = %line.tbl_name,
        error = %err,
        "external call failed; record marked as failed"
    );
    fail(line, step, err.to_string())
}

/// Prompt variables from `(name, value)` pairs.
pub(crate) fn vars(pairs: &[(&str, String)]) -> Vars {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub(crate) fn model_response(text: &str) -> String {
    format!("Model Response: {text}")
}

pub(crate) fn unexpected(step: GenerationStep, detail: impl Into<String>) -> SquabError {
    SquabError::UnexpectedShape {
        stage: step.key(),
        detail: detail.into(),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted collaborators for handler tests.

    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::HandlerContext;
    use crate::baseline::TemplateQueryGenerator;
    use crate::config::GeneratorParams;
    use crate::connector::{Rows, TableConnector, TableMeta};
    use crate::error::{ConnectorError, ExternalCallError};
    use crate::llm::{Completion, CompletionProvider, EmbeddingProvider, Embeddings, Message};
    use crate::pipeline::registry::Category;

    /// Answers in order; errors once the script runs out.
    pub struct Scripted {
        pub replies: RefCell<VecDeque<Completion>>,
        pub seen: RefCell<Vec<Vec<Message>>>,
    }

    impl Scripted {
        pub fn new(replies: &[(&str, f64)]) -> Self {
            Self {
                replies: RefCell::new(
                    replies
                        .iter()
                        .map(|(t, c)| Completion { text: t.to_string(), cost: *c })
                        .collect(),
                ),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionProvider for Scripted {
        fn complete(&self, messages: &[Message]) -> Result<Completion, ExternalCallError> {
            self.seen.borrow_mut().push(messages.to_vec());
            self.replies
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ExternalCallError::Http("script exhausted".into()))
        }
    }

    /// One fixed vector per known input string.
    pub struct FixedEmbeddings {
        pub vectors: HashMap<String, Vec<f64>>,
        pub cost: f64,
    }

    impl EmbeddingProvider for FixedEmbeddings {
        fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError> {
            Ok(Embeddings {
                vectors: inputs
                    .iter()
                    .map(|i| self.vectors.get(i).cloned().unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
                    .collect(),
                cost: self.cost,
            })
        }
    }

    /// Canned rows per exact SQL text; anything else is a missing column.
    #[derive(Default)]
    pub struct FakeConnector {
        pub rows: HashMap<String, Rows>,
        pub missing_functions: bool,
    }

    impl TableConnector for FakeConnector {
        fn db_id(&self) -> &str {
            "fake"
        }
        fn db_path(&self) -> &str {
            "fake.sqlite"
        }
        fn load_tables(&self) -> Result<Vec<TableMeta>, ConnectorError> {
            Ok(Vec::new())
        }
        fn database_schema(&self) -> Result<String, ConnectorError> {
            Ok(String::new())
        }
        fn table_schema(&self, table: &str) -> Result<String, ConnectorError> {
            Err(ConnectorError::TableNotFound(table.to_string()))
        }
        fn run_query(&self, sql: &str) -> Result<Rows, ConnectorError> {
            match self.rows.get(sql) {
                Some(r) => Ok(r.clone()),
                None if self.missing_functions => Err(ConnectorError::MissingFunction(sql.to_string())),
                None => Err(ConnectorError::MissingColumn(sql.to_string())),
            }
        }
        fn run_query_with_timeout(&self, sql: &str, _timeout: Duration) -> Result<Rows, ConnectorError> {
            self.run_query(sql)
        }
    }

    pub fn context<'a>(
        category: Category,
        connector: &'a dyn TableConnector,
        completion: Option<&'a dyn CompletionProvider>,
        embedder: Option<&'a dyn EmbeddingProvider>,
        params: &'a GeneratorParams,
    ) -> HandlerContext<'a> {
        HandlerContext {
            category,
            connector,
            completion,
            embedder,
            baseline: &TemplateQueryGenerator,
            params,
            query_timeout: Duration::from_secs(1),
            rng: ChaCha8Rng::seed_from_u64(42),
        }
    }
}
