// src/pipeline/mod.rs
//
// Stage processor: skip-on-failure, deep copy, fan-out flattening.

pub mod registry;
pub mod verify;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::line::Line;

/// The three ordered generation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStep {
    PatternIdentification,
    RelationalMetadata,
    TestGeneration,
}

impl GenerationStep {
    pub const ALL: [GenerationStep; 3] = [
        GenerationStep::PatternIdentification,
        GenerationStep::RelationalMetadata,
        GenerationStep::TestGeneration,
    ];

    /// Key this stage populates (and charges costs / failures under).
    pub fn key(self) -> &'static str {
        match self {
            GenerationStep::PatternIdentification => "pattern_identification",
            GenerationStep::RelationalMetadata => "relational_metadata",
            GenerationStep::TestGeneration => "test_generation",
        }
    }
}

/// What a handler hands back for one input record.
#[derive(Debug, Clone, PartialEq)]
pub enum Fanout {
    One(Line),
    Many(Vec<Line>),
}

impl From<Line> for Fanout {
    fn from(line: Line) -> Self {
        Fanout::One(line)
    }
}

impl From<Vec<Line>> for Fanout {
    fn from(lines: Vec<Line>) -> Self {
        Fanout::Many(lines)
    }
}

impl IntoIterator for Fanout {
    type Item = Line;
    type IntoIter = std::vec::IntoIter<Line>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Fanout::One(line) => vec![line].into_iter(),
            Fanout::Many(lines) => lines.into_iter(),
        }
    }
}

/// Run `handler` over every live record of `dataset`.
///
/// Verifies stage preconditions first; a violation returns the error and
/// nothing else. Failed records pass through untouched. Live records are
/// cloned before the handler sees them, and whatever the handler returns is
/// flattened in input order. Any error out of the handler aborts the call.
pub fn process<F>(dataset: &[Line], step: GenerationStep, mut handler: F) -> Result<Vec<Line>>
where
    F: FnMut(Line) -> Result<Fanout>,
{
    verify::verify(dataset, step)?;

    info!(stage = step.key(), records = dataset.len(), "stage start");

    let mut out = Vec::with_capacity(dataset.len());
    for line in dataset {
        if line.has_failed() {
            out.push(line.clone());
            continue;
        }

        let produced = handler(line.clone())?;
        let before = out.len();
        out.extend(produced);
        debug!(
            stage = step.key(),
            table = %line.tbl_name,
            produced = out.len() - before,
            "record processed"
        );
    }

    info!(stage = step.key(), records = out.len(), "stage done");
    Ok(out)
}
