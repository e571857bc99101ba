// src/pipeline/verify.rs

use crate::error::StageOrderError;
use crate::line::{Line, LineKey};
use crate::pipeline::GenerationStep;

struct Requirement {
    previous_step: &'static str,
    keys: &'static [LineKey],
}

const TABLE_IDENTITY: &[LineKey] = &[
    LineKey::DbId,
    LineKey::DbPath,
    LineKey::DbSchema,
    LineKey::DbSchemaTable,
    LineKey::DbSchemaTableExamples,
    LineKey::TblName,
];

fn requirement(step: GenerationStep) -> Requirement {
    match step {
        GenerationStep::PatternIdentification => Requirement {
            previous_step: "reading_table",
            keys: TABLE_IDENTITY,
        },
        GenerationStep::RelationalMetadata => Requirement {
            previous_step: GenerationStep::PatternIdentification.key(),
            keys: &[LineKey::PatternIdentification],
        },
        GenerationStep::TestGeneration => Requirement {
            previous_step: GenerationStep::RelationalMetadata.key(),
            keys: &[LineKey::RelationalMetadata],
        },
    }
}

/// Fail on the first live record that lacks a key `step` depends on.
///
/// Records already marked failed are never handed to a handler, so they are
/// not checked.
pub fn verify(dataset: &[Line], step: GenerationStep) -> Result<(), StageOrderError> {
    let req = requirement(step);

    for line in dataset.iter().filter(|l| !l.has_failed()) {
        let missing: Vec<&'static str> = req
            .keys
            .iter()
            .filter(|k| !line.has_key(**k))
            .map(|k| k.name())
            .collect();

        if !missing.is_empty() {
            return Err(StageOrderError {
                stage: step,
                previous_step: req.previous_step,
                missing,
            });
        }
    }

    Ok(())
}
