//! Generation of ambiguous and unanswerable text-to-SQL test cases from
//! relational databases.
//!
//! Every table becomes a [`line::Line`] that flows through three stages per
//! category (pattern identification, relational metadata, test generation).
//! Stages are run by [`pipeline::process`], which may fan one record out
//! into many and never drops a record for an expected reason.

pub mod baseline;
pub mod config;
pub mod connector;
pub mod detectors;
pub mod error;
pub mod evaluate;
pub mod handlers;
pub mod line;
pub mod llm;
pub mod logger;
pub mod matching;
pub mod orchestrator;
pub mod output;
pub mod pipeline;

pub use error::{Result, SquabError};
pub use line::Line;
pub use pipeline::registry::Category;
