// src/handlers/test_generation.rs

use rand::seq::SliceRandom;
use tracing::debug;

use crate::connector::quote_ident;
use crate::error::{ConnectorError, Result};
use crate::handlers::{external_failure, fail, model_response, unexpected, vars, HandlerContext};
use crate::line::{Line, PatternRecord, QueryTemplate, RelationalMetadata};
use crate::llm::parse::{last_json_object, str_field};
use crate::llm::prompt;
use crate::matching::replace_word;
use crate::pipeline::{Fanout, GenerationStep};

const STEP: GenerationStep = GenerationStep::TestGeneration;

fn template(test_category: &str, query: String, question: String) -> QueryTemplate {
    QueryTemplate {
        question,
        query,
        test_category: test_category.to_string(),
    }
}

/* ============================================================
   Shared: one descendant per template group
   ============================================================ */

/// Turn template groups into finished test cases.
///
/// Each group becomes its own copy of `line` holding the group's SQL as
/// `target`; the question is written by one model call charged to that copy.
fn generate_from_templates(
    line: Line,
    ctx: &HandlerContext<'_>,
    mut groups: Vec<Vec<QueryTemplate>>,
) -> Result<Fanout> {
    groups.retain(|g| !g.is_empty());
    groups.truncate(ctx.params.max_tests_per_pattern);
    if groups.is_empty() {
        return Ok(fail(line, STEP, "No templates generated."));
    }

    let p = ctx.params;
    let metadata = serde_json::to_string(&line.relational_metadata)?;
    let definition = prompt::definition(ctx.category);

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let queries: Vec<String> = group.iter().map(|t| t.query.clone()).collect();
        let v = vars(&[
            ("definition", definition.to_string()),
            ("queries", queries.join("\n")),
            ("metadata", metadata.clone()),
            ("database", line.db_schema_table_examples.clone()),
        ]);

        let mut child = line.clone();
        child.test_sub_category = Some(group[0].test_category.clone());
        child.target = Some(queries);
        child.templates = Some(group);

        let messages = prompt::build_messages(
            Some(p.question_system_prompt.as_deref().unwrap_or(prompt::QUESTION_SYSTEM)),
            p.question_user_prompt.as_deref().unwrap_or(prompt::QUESTION_USER),
            &p.question_few_shots,
            &v,
        );
        let completion = match ctx.complete(&messages) {
            Ok(c) => c,
            Err(e) => {
                out.extend(external_failure(child, STEP, e));
                continue;
            }
        };

        child.charge(STEP, completion.cost);
        match last_json_object(&completion.text).and_then(|o| str_field(&o, "question").map(str::to_string)) {
            Some(q) => child.question = Some(q),
            None => child.mark_failed(STEP, model_response(&completion.text)),
        }
        out.push(child);
    }

    Ok(out.into())
}

/* ============================================================
   Ambiguity categories
   ============================================================ */

/// Attachment: the relative clause binds either to both entity values or
/// only to the second.
pub fn attachment_tests(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(RelationalMetadata::OverlappingValues(m)) = &line.relational_metadata else {
        return Err(unexpected(STEP, "expected overlapping values"));
    };

    let t = quote_ident(&line.tbl_name);
    let (e, c, proj) = (quote_ident(&m.entity), quote_ident(&m.component), quote_ident(&m.column_to_project));
    let (v1, v2) = (&m.entity_values.0, &m.entity_values.1);
    let vi = &m.component_value;

    let both = format!("({e} = '{v1}' OR {e} = '{v2}') AND {c} = '{vi}'");
    let second_only = format!("{e} = '{v1}' OR {e} = '{v2}' AND {c} = '{vi}'");

    let group = vec![
        template(
            "attachment",
            format!("SELECT {proj} FROM {t} WHERE {both}"),
            format!(
                "List {} where {} is {vi} and {} is either {v1} or {v2}",
                m.column_to_project, m.component, m.entity
            ),
        ),
        template(
            "attachment",
            format!("SELECT {proj} FROM {t} WHERE {second_only}"),
            format!(
                "List {} where {} is {v1} or where {} is {v2} and {} is {vi}",
                m.column_to_project, m.entity, m.entity, m.component
            ),
        ),
    ];

    generate_from_templates(line, ctx, vec![group])
}

/// Scope: collective ("in all") against distributive ("each") reading.
pub fn scope_tests(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(RelationalMetadata::EntityComponent(m)) = &line.relational_metadata else {
        return Err(unexpected(STEP, "expected an entity/component pair"));
    };

    let t = quote_ident(&line.tbl_name);
    let (e, c) = (quote_ident(&m.entity), quote_ident(&m.component));
    let (entity, component) = (m.entity.to_lowercase(), m.component.to_lowercase());

    let group = vec![
        template(
            "scope",
            format!(
                "SELECT {c} FROM {t} GROUP BY {c} \
                 HAVING COUNT(DISTINCT {e}) = (SELECT COUNT(DISTINCT {e}) FROM {t})"
            ),
            format!("What {component} are present in all {entity}s?"),
        ),
        template(
            "scope",
            format!("SELECT DISTINCT {c}, {e} FROM {t}"),
            format!("What {component} does each {entity} have?"),
        ),
    ];

    generate_from_templates(line, ctx, vec![group])
}

/// Variants of one baseline template, one per similar column, plus a
/// combined-columns reading when the column is projected or sorted on.
fn vague_variants(base: &QueryTemplate, col: &str, similar: &[String]) -> Vec<QueryTemplate> {
    let quoted = quote_ident(col);
    let mut out: Vec<QueryTemplate> = similar
        .iter()
        .map(|other| QueryTemplate {
            question: replace_word(&base.question, col, other),
            query: base.query.replace(&quoted, &quote_ident(other)),
            test_category: base.test_category.clone(),
        })
        .collect();

    let lower = base.query.to_lowercase();
    let Some((before, after)) = lower.split_once("from") else {
        return out;
    };
    let quoted_lower = quoted.to_lowercase();

    let projected = before.contains(&quoted_lower)
        && !after.contains(&quoted_lower)
        && !lower.contains(&format!("({quoted_lower})"));
    let ordered = after.contains(&format!("order by {quoted_lower}"));

    if projected || ordered {
        let combined = similar.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        out.push(QueryTemplate {
            question: replace_word(&base.question, col, &combined),
            query: base.query.replace(&quoted, &combined),
            test_category: base.test_category.clone(),
        });
    }

    out
}

/// Column ambiguity: baseline queries over one similar column, rewritten to
/// every member of the cluster.
pub fn vague_tests(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(PatternRecord::SimilarColumns(s)) = &line.pattern_identification else {
        return Err(unexpected(STEP, "expected similar columns"));
    };
    let similar = s.similar_columns.clone();

    let Some(col) = similar.choose(&mut ctx.rng).cloned() else {
        return Ok(fail(line, STEP, "No similar columns to build queries on."));
    };

    let groups: Vec<Vec<QueryTemplate>> = ctx
        .baseline
        .generate(&line.table, &col)
        .iter()
        .map(|base| vague_variants(base, &col, &similar))
        .collect();

    debug!(table = %line.tbl_name, column = %col, groups = groups.len(), "vague templates");
    generate_from_templates(line, ctx, groups)
}

/* ============================================================
   Unanswerable categories
   ============================================================ */

/// Baseline queries on `source`, rewritten to reference something the
/// database lacks; only rewrites whose execution fails the way `keep`
/// expects survive, each as its own group.
fn rewrite_baseline(
    line: &Line,
    ctx: &HandlerContext<'_>,
    source: &str,
    replacement_sql: &str,
    replacement_text: &str,
    keep: fn(&ConnectorError) -> bool,
) -> Vec<Vec<QueryTemplate>> {
    let quoted = quote_ident(source);

    ctx.baseline
        .generate(&line.table, source)
        .into_iter()
        .filter_map(|mut t| {
            t.query = t.query.replace(&quoted, replacement_sql);
            let unanswerable = match ctx.connector.run_query_with_timeout(&t.query, ctx.query_timeout) {
                Ok(_) => false,
                Err(e) => keep(&e),
            };
            debug!(query = %t.query, unanswerable, "rewritten baseline query");

            if !unanswerable {
                return None;
            }
            t.question = replace_word(&t.question, source, replacement_text);
            Some(vec![t])
        })
        .collect()
}

/// Column unanswerable: questions about an attribute the table lacks.
pub fn column_unanswerable_tests(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(RelationalMetadata::NewAttribute(attr)) = &line.relational_metadata else {
        return Err(unexpected(STEP, "expected a new attribute"));
    };
    let attr = attr.clone();

    let Some(source) = attr.col_to_use_for_generation.as_deref() else {
        return Ok(fail(line, STEP, "No column to build queries on."));
    };

    let groups = rewrite_baseline(
        &line,
        ctx,
        source,
        &quote_ident(&attr.column_name),
        &attr.column_name,
        |e| matches!(e, ConnectorError::MissingColumn(_)),
    );
    generate_from_templates(line, ctx, groups)
}

/// Calculation unanswerable and out of scope: questions needing a function
/// the database does not provide.
pub fn udf_unanswerable_tests(line: Line, ctx: &mut HandlerContext<'_>) -> Result<Fanout> {
    let Some(RelationalMetadata::Udf(udf)) = &line.relational_metadata else {
        return Err(unexpected(STEP, "expected a udf proposal"));
    };
    let udf = udf.clone();

    let Some(source) = udf.col_to_use_for_generation.as_deref() else {
        return Ok(fail(line, STEP, "No column to build queries on."));
    };

    let groups = rewrite_baseline(
        &line,
        ctx,
        source,
        &udf.udf_name,
        &udf.udf_name,
        |e| matches!(e, ConnectorError::MissingFunction(_)),
    );
    generate_from_templates(line, ctx, groups)
}
