// src/handlers/pattern_identification.rs

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::connector::ColumnKind;
use crate::detectors::{
    cluster_columns, columns_no_pk_fk, find_overlapping_values, many_to_many_pairs, sample_overlaps,
};
use crate::detectors::overlapping::SAMPLE_ROWS;
use crate::error::{ExternalCallError, Result};
use crate::handlers::{external_failure, fail, HandlerContext};
use crate::line::{EntityComponent, Line, OverlappingValues, PatternRecord, SimilarColumns, TableColumns};
use crate::pipeline::{Fanout, GenerationStep};

const STEP: GenerationStep = GenerationStep::PatternIdentification;

/// Attachment: entity values sharing a component value.
pub fn overlapping_columns(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let non_key = columns_no_pk_fk(&line.table, None);
    let categorical = columns_no_pk_fk(
        &line.table,
        Some(&line.table.columns_of_kind(ColumnKind::Categorical)),
    );

    if non_key.len() < 3 {
        return Ok(fail(
            line,
            STEP,
            "Not enough columns to identify overlapping columns, needed at least 3.",
        ));
    }
    let Some(column_to_project) = categorical.choose(&mut ctx.rng).cloned() else {
        return Ok(fail(line, STEP, "No categorical column to project."));
    };

    let components: Vec<&String> = non_key.iter().filter(|c| **c != column_to_project).collect();
    let entities: Vec<&String> = categorical.iter().filter(|c| **c != column_to_project).collect();

    let mut patterns = Vec::new();
    for entity in entities {
        for component in components.iter().filter(|c| **c != entity) {
            let rows = match ctx
                .connector
                .fetch_pairs(&line.tbl_name, entity, component, SAMPLE_ROWS)
            {
                Ok(r) => r,
                Err(e) => return Ok(external_failure(line, STEP, ExternalCallError::Query(e))),
            };

            let overlaps = find_overlapping_values(&rows);
            for sample in sample_overlaps(&overlaps, &mut ctx.rng) {
                debug!(table = %line.tbl_name, %entity, %component, "overlapping values");
                patterns.push(OverlappingValues {
                    entity: entity.clone(),
                    component: (*component).clone(),
                    column_to_project: column_to_project.clone(),
                    entity_values: sample.entity_values,
                    component_value: sample.component_value,
                });
            }
        }
    }

    patterns.truncate(ctx.params.max_patterns_per_table);
    if patterns.is_empty() {
        return Ok(fail(line, STEP, "No overlapping columns found."));
    }

    Ok(line
        .fan_out(STEP, 0.0, patterns, |l, p| {
            l.pattern_identification = Some(PatternRecord::OverlappingValues(p));
        })
        .into())
}

/// Scope: column pairs related many-to-many.
pub fn many_to_many_columns(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let columns = columns_no_pk_fk(&line.table, None);

    let mut pairs = match many_to_many_pairs(ctx.connector, &line.tbl_name, &columns) {
        Ok(p) => p,
        Err(e) => return Ok(external_failure(line, STEP, ExternalCallError::Query(e))),
    };

    pairs.truncate(ctx.params.max_patterns_per_table);
    if pairs.is_empty() {
        return Ok(fail(line, STEP, "No many-to-many relationships found."));
    }

    Ok(line
        .fan_out(STEP, 0.0, pairs, |l, (entity, component)| {
            l.pattern_identification =
                Some(PatternRecord::EntityComponent(EntityComponent { entity, component }));
        })
        .into())
}

/// Column ambiguity: clusters of semantically close column names.
pub fn semantic_columns(mut line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let columns = columns_no_pk_fk(&line.table, None);
    if columns.len() < 2 {
        return Ok(fail(
            line,
            STEP,
            "The table has less than two columns excluding primary and foreign keys, cannot find a pattern.",
        ));
    }

    let embeddings = match ctx.embed(&columns) {
        Ok(e) => e,
        Err(e) => return Ok(external_failure(line, STEP, e)),
    };

    let mut clusters = cluster_columns(&columns, &embeddings.vectors, ctx.params.threshold_similar_values);
    clusters.truncate(ctx.params.max_patterns_per_table);

    if clusters.is_empty() {
        line.charge(STEP, embeddings.cost);
        line.mark_failed(STEP, "No similar columns found.");
        return Ok(line.into());
    }

    debug!(table = %line.tbl_name, clusters = clusters.len(), "similar columns");
    Ok(line
        .fan_out(STEP, embeddings.cost, clusters, |l, similar_columns| {
            l.pattern_identification = Some(PatternRecord::SimilarColumns(SimilarColumns { similar_columns }));
        })
        .into())
}

fn pick_column(line: &Line, kind: ColumnKind, rng: &mut ChaCha8Rng) -> Option<String> {
    let candidates = columns_no_pk_fk(&line.table, Some(&line.table.columns_of_kind(kind)));
    candidates.choose(rng).cloned()
}

/// Unanswerable categories: the table itself, with one categorical and one
/// numerical column picked to seed baseline queries.
pub fn table_snapshot(mut line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let categorical_column = pick_column(&line, ColumnKind::Categorical, &mut ctx.rng);
    let numerical_column = pick_column(&line, ColumnKind::Numerical, &mut ctx.rng);

    if categorical_column.is_none() && numerical_column.is_none() {
        return Ok(fail(line, STEP, "No categorical or numerical column to build queries on."));
    }

    line.charge(STEP, 0.0);
    line.pattern_identification = Some(PatternRecord::TableColumns(TableColumns {
        columns: line.table.column_names().map(str::to_string).collect(),
        categorical_column,
        numerical_column,
    }));
    Ok(line.into())
}
