// src/handlers/relational_metadata.rs

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::handlers::{external_failure, model_response, unexpected, vars, HandlerContext};
use crate::line::{
    EntityComponent, Line, NewAttribute, PatternRecord, RelationalMetadata, TableColumns, UdfSpec, ValueKind,
};
use crate::llm::parse::{json_with_code, last_json_object, str_field};
use crate::llm::prompt::{self, Vars};
use crate::matching::closest_name;
use crate::pipeline::{Fanout, GenerationStep};

const STEP: GenerationStep = GenerationStep::RelationalMetadata;

/// Ask the model with the category's prompt (or `default_*`).
fn ask(
    ctx: &HandlerContext<'_>,
    default_system: &str,
    default_user: &str,
    vars: &Vars,
) -> std::result::Result<crate::llm::Completion, crate::error::ExternalCallError> {
    let p = ctx.params;
    let messages = prompt::build_messages(
        Some(p.metadata_system_prompt.as_deref().unwrap_or(default_system)),
        p.metadata_user_prompt.as_deref().unwrap_or(default_user),
        &p.metadata_few_shots,
        vars,
    );
    ctx.complete(&messages)
}

fn parse_kind(obj: &Map<String, Value>, key: &str) -> Option<ValueKind> {
    match str_field(obj, key)?.to_lowercase().as_str() {
        "categorical" => Some(ValueKind::Categorical),
        "numerical" | "numeric" => Some(ValueKind::Numerical),
        _ => None,
    }
}

fn snapshot(line: &Line) -> Result<TableColumns> {
    match &line.pattern_identification {
        Some(PatternRecord::TableColumns(t)) => Ok(t.clone()),
        other => Err(unexpected(STEP, format!("expected a table snapshot, got {other:?}"))),
    }
}

fn column_for(snap: &TableColumns, kind: ValueKind) -> Option<String> {
    match kind {
        ValueKind::Categorical => snap.categorical_column.clone(),
        ValueKind::Numerical => snap.numerical_column.clone(),
    }
}

/* ============================================================
   Ambiguity categories
   ============================================================ */

/// Attachment: the detected overlap already is the metadata.
pub fn copy_overlapping_values(mut line: Line, _ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(PatternRecord::OverlappingValues(p)) = &line.pattern_identification else {
        return Err(unexpected(STEP, "expected overlapping values"));
    };

    line.relational_metadata = Some(RelationalMetadata::OverlappingValues(p.clone()));
    line.charge(STEP, 0.0);
    Ok(line.into())
}

/// Scope: let the model decide which column is the entity.
pub fn entity_component(mut line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(PatternRecord::EntityComponent(pair)) = &line.pattern_identification else {
        return Err(unexpected(STEP, "expected an entity/component pair"));
    };

    let v = vars(&[
        ("pattern_identification", format!("\"{}\", \"{}\"", pair.entity, pair.component)),
        ("database", line.db_schema_table_examples.clone()),
    ]);
    let completion = match ask(ctx, prompt::ENTITY_COMPONENT_SYSTEM, prompt::ENTITY_COMPONENT_USER, &v) {
        Ok(c) => c,
        Err(e) => return Ok(external_failure(line, STEP, e)),
    };
    line.charge(STEP, completion.cost);

    let parsed = last_json_object(&completion.text).and_then(|obj| {
        let entity = str_field(&obj, "entity")?.to_string();
        let component = str_field(&obj, "component")?.to_string();
        Some((entity, component))
    });

    let Some((entity, component)) = parsed else {
        line.mark_failed(STEP, model_response(&completion.text));
        return Ok(line.into());
    };

    let snap = |name: &str| {
        closest_name(line.table.column_names(), name)
            .unwrap_or(name)
            .to_string()
    };
    let metadata = EntityComponent {
        entity: snap(&entity),
        component: snap(&component),
    };

    debug!(table = %line.tbl_name, entity = %metadata.entity, component = %metadata.component, "entity/component");
    line.relational_metadata = Some(RelationalMetadata::EntityComponent(metadata));
    Ok(line.into())
}

/// Column ambiguity: one label covering the similar columns.
pub fn hypernym(mut line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(PatternRecord::SimilarColumns(similar)) = &line.pattern_identification else {
        return Err(unexpected(STEP, "expected similar columns"));
    };

    let v = vars(&[
        ("tbl_schema", line.db_schema_table_examples.clone()),
        ("cols", similar.similar_columns.join(", ")),
    ]);
    let completion = match ask(ctx, prompt::HYPERNYM_SYSTEM, prompt::HYPERNYM_USER, &v) {
        Ok(c) => c,
        Err(e) => return Ok(external_failure(line, STEP, e)),
    };
    line.charge(STEP, completion.cost);

    match last_json_object(&completion.text).and_then(|o| str_field(&o, "label").map(str::to_string)) {
        Some(label) => line.relational_metadata = Some(RelationalMetadata::Hypernym { label }),
        None => line.mark_failed(STEP, model_response(&completion.text)),
    }
    Ok(line.into())
}

/* ============================================================
   Unanswerable categories
   ============================================================ */

/// Column unanswerable: attributes the table does not have, one record each.
pub fn new_attributes(mut line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let snap = snapshot(&line)?;

    let v = vars(&[("tbl_schema", line.db_schema_table_examples.clone())]);
    let completion = match ask(ctx, prompt::NEW_ATTRIBUTES_SYSTEM, prompt::NEW_ATTRIBUTES_USER, &v) {
        Ok(c) => c,
        Err(e) => return Ok(external_failure(line, STEP, e)),
    };

    let existing: Vec<String> = snap.columns.iter().map(|c| c.to_lowercase()).collect();
    let suggested: Vec<NewAttribute> = last_json_object(&completion.text)
        .and_then(|o| o.get("suggested_columns").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|o| {
            let column_name = str_field(o, "column_name")?.to_string();
            let column_type = parse_kind(o, "column_type")?;
            Some(NewAttribute {
                col_to_use_for_generation: column_for(&snap, column_type),
                column_name,
                column_type,
            })
        })
        .filter(|a| !existing.contains(&a.column_name.to_lowercase()))
        .collect();

    if suggested.is_empty() {
        line.charge(STEP, completion.cost);
        line.mark_failed(STEP, model_response(&completion.text));
        return Ok(line.into());
    }

    Ok(line
        .fan_out(STEP, completion.cost, suggested, |l, attr| {
            l.relational_metadata = Some(RelationalMetadata::NewAttribute(attr));
        })
        .into())
}

fn udfs(mut line: Line, ctx: &mut HandlerContext<'_>, default_system: &str) -> Result<Fanout> {
    let snap = snapshot(&line)?;

    let v = vars(&[("tbl_schema", line.db_schema_table_examples.clone())]);
    let completion = match ask(ctx, default_system, prompt::UDF_USER, &v) {
        Ok(c) => c,
        Err(e) => return Ok(external_failure(line, STEP, e)),
    };

    let proposals: Vec<UdfSpec> = json_with_code(&completion.text)
        .into_iter()
        .filter_map(|(o, code)| {
            let udf_name = str_field(&o, "udf_name")?.to_string();
            if !udf_name.contains('(') {
                return None;
            }
            let udf_output_type = parse_kind(&o, "udf_output_type")?;
            Some(UdfSpec {
                col_to_use_for_generation: column_for(&snap, udf_output_type),
                udf_name,
                udf_output_type,
                udf_python_code: code,
            })
        })
        .collect();

    if proposals.is_empty() {
        line.charge(STEP, completion.cost);
        line.mark_failed(STEP, model_response(&completion.text));
        return Ok(line.into());
    }

    Ok(line
        .fan_out(STEP, completion.cost, proposals, |l, udf| {
            l.relational_metadata = Some(RelationalMetadata::Udf(udf));
        })
        .into())
}

/// Calculation unanswerable: functions computable from the data but absent.
pub fn computable_udfs(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    udfs(line, ctx, prompt::COMPUTABLE_UDF_SYSTEM)
}

/// Out of scope: functions needing knowledge outside the database.
pub fn out_of_scope_udfs(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    udfs(line, ctx, prompt::OUT_OF_SCOPE_UDF_SYSTEM)
}
