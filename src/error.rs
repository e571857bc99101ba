//! Error types for the generation pipeline.
//!
//! Only `ExternalCallError` is ever recovered from (inside a handler, by
//! marking the record as failed). Everything else aborts the stage.

use crate::pipeline::GenerationStep;

pub type Result<T, E = SquabError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SquabError {
    #[error(transparent)]
    StageOrder(#[from] StageOrderError),

    #[error("External call failed: {0}")]
    External(#[from] ExternalCallError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown category `{0}`")]
    UnknownCategory(String),

    #[error("Stage `{stage}` cannot handle this record: {detail}")]
    UnexpectedShape { stage: &'static str, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<ConnectorError> for SquabError {
    fn from(e: ConnectorError) -> Self {
        SquabError::External(ExternalCallError::Query(e))
    }
}

/// A stage was invoked on records that an earlier stage never populated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Stage `{}` cannot run: previous step `{previous_step}` has not been executed. Missing keys: {missing:?}",
    .stage.key()
)]
pub struct StageOrderError {
    pub stage: GenerationStep,
    pub previous_step: &'static str,
    pub missing: Vec<&'static str>,
}

/// Failures of collaborators (SQL engine, text-generation, embeddings).
#[derive(Debug, thiserror::Error)]
pub enum ExternalCallError {
    #[error("Query error: {0}")]
    Query(#[from] ConnectorError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No provider configured for this call")]
    MissingProvider,
}

impl From<reqwest::Error> for ExternalCallError {
    fn from(e: reqwest::Error) -> Self {
        ExternalCallError::Http(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("No such column: {0}")]
    MissingColumn(String),

    #[error("No such function: {0}")]
    MissingFunction(String),

    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::OperationInterrupted {
                return ConnectorError::Timeout { timeout_ms: 0 };
            }
        }

        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("no such column") {
            ConnectorError::MissingColumn(msg)
        } else if lower.contains("no such function") {
            ConnectorError::MissingFunction(msg)
        } else if lower.contains("no such table") {
            ConnectorError::TableNotFound(msg)
        } else {
            ConnectorError::Sqlite(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_error_names_previous_step() {
        let err = StageOrderError {
            stage: GenerationStep::RelationalMetadata,
            previous_step: "pattern_identification",
            missing: vec!["pattern_identification"],
        };
        let msg = err.to_string();
        assert!(msg.contains("relational_metadata"));
        assert!(msg.contains("previous step `pattern_identification`"));
    }

    #[test]
    fn sqlite_messages_map_to_distinct_kinds() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT)").unwrap();

        let err = conn.prepare("SELECT `b` FROM `t`").map(|_| ()).unwrap_err();
        assert!(matches!(ConnectorError::from(err), ConnectorError::MissingColumn(_)));

        let err = conn.prepare("SELECT nope(`a`) FROM `t`").map(|_| ()).unwrap_err();
        assert!(matches!(ConnectorError::from(err), ConnectorError::MissingFunction(_)));

        let err = conn.prepare("SELECT * FROM `missing`").map(|_| ()).unwrap_err();
        assert!(matches!(ConnectorError::from(err), ConnectorError::TableNotFound(_)));
    }
}
