// src/orchestrator.rs
//
// Table ingestion and the per-category three-stage run.

use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, info_span, warn};

use crate::baseline::BaselineQueryGenerator;
use crate::config::RunConfig;
use crate::connector::{TableConnector, TableMeta};
use crate::error::Result;
use crate::handlers::HandlerContext;
use crate::line::Line;
use crate::llm::{CompletionProvider, EmbeddingProvider};
use crate::matching::resolve_names;
use crate::pipeline::registry::Category;
use crate::pipeline::{process, GenerationStep};

const EXAMPLE_VALUES: usize = 2;

/* ============================================================
   Ingestion
   ============================================================ */

/// Split a column list on commas outside parentheses and quotes.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in body.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&body[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&body[start..]);
    parts
}

fn leading_identifier(def: &str) -> &str {
    let def = def.trim_start();
    match def.chars().next() {
        Some(open @ ('`' | '"' | '[')) => {
            let close = if open == '[' { ']' } else { open };
            let rest = &def[1..];
            rest.find(close).map(|end| &rest[..end]).unwrap_or(rest)
        }
        _ => def.split_whitespace().next().unwrap_or(""),
    }
}

/// Table DDL with one column definition per line, each followed by
/// `-- Example Values: (`v1`, `v2`)` when the column has samples.
pub fn schema_with_examples(ddl: &str, table: &TableMeta) -> String {
    let (Some(open), Some(close)) = (ddl.find('('), ddl.rfind(')')) else {
        return ddl.to_string();
    };
    if close <= open {
        return ddl.to_string();
    }

    let defs = split_top_level(&ddl[open + 1..close]);
    let last = defs.len() - 1;

    let mut out = String::with_capacity(ddl.len() * 2);
    out.push_str(ddl[..=open].trim_end());
    out.push('\n');

    for (i, def) in defs.iter().enumerate() {
        out.push_str("    ");
        out.push_str(def.trim());
        if i != last {
            out.push(',');
        }

        let name = leading_identifier(def);
        let samples = table
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| &c.sample_data[..c.sample_data.len().min(EXAMPLE_VALUES)])
            .unwrap_or_default();
        if !samples.is_empty() {
            let shown: Vec<String> = samples.iter().map(|v| format!("`{v}`")).collect();
            out.push_str(&format!(" -- Example Values: ({})", shown.join(", ")));
        }
        out.push('\n');
    }

    out.push_str(&ddl[close..]);
    out
}

/// One `Line` per table, optionally limited to `only_these_tbl`.
///
/// Requested names are matched to the closest existing table names, so
/// small spelling differences still select a table.
pub fn read_tables(connector: &dyn TableConnector, only_these_tbl: Option<&[String]>) -> Result<Vec<Line>> {
    let mut tables = connector.load_tables()?;

    if let Some(wanted) = only_these_tbl {
        let available: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let chosen = resolve_names(wanted, &available);
        if chosen.len() < wanted.len() {
            warn!(requested = wanted.len(), resolved = chosen.len(), "some requested tables were not found");
        }
        tables.retain(|t| chosen.contains(&t.name));
    }

    let db_schema = connector.database_schema()?;
    let mut lines = Vec::with_capacity(tables.len());
    for table in tables {
        let ddl = connector.table_schema(&table.name)?;
        let annotated = schema_with_examples(&ddl, &table);
        lines.push(Line::new(
            connector.db_id(),
            connector.db_path(),
            db_schema.clone(),
            ddl,
            annotated,
            table,
        ));
    }

    info!(db = connector.db_id(), tables = lines.len(), "tables read");
    Ok(lines)
}

/* ============================================================
   Generation
   ============================================================ */

/// Everything one database run needs.
pub struct Generator<'a> {
    pub connector: &'a dyn TableConnector,
    pub completion: Option<&'a dyn CompletionProvider>,
    pub embedder: Option<&'a dyn EmbeddingProvider>,
    pub baseline: &'a dyn BaselineQueryGenerator,
    pub config: &'a RunConfig,
}

impl Generator<'_> {
    /// Run each category over the database's tables.
    ///
    /// Output is the concatenation of the per-category datasets in the order
    /// `categories` lists them. An empty list means every category.
    pub fn generate(&self, only_these_tbl: Option<&[String]>, categories: &[Category]) -> Result<Vec<Line>> {
        let tables = read_tables(self.connector, only_these_tbl)?;
        let categories = if categories.is_empty() {
            &Category::ALL[..]
        } else {
            categories
        };

        let mut out = Vec::new();
        for &category in categories {
            out.extend(self.run_category(&tables, category)?);
        }
        Ok(out)
    }

    fn run_category(&self, tables: &[Line], category: Category) -> Result<Vec<Line>> {
        let span = info_span!("category", name = category.name(), db = self.connector.db_id());
        let _guard = span.enter();

        let params = self.config.params_for(category);
        let mut ctx = HandlerContext {
            category,
            connector: self.connector,
            completion: self.completion,
            embedder: self.embedder,
            baseline: self.baseline,
            params: &params,
            query_timeout: Duration::from_secs(self.config.query_timeout_secs),
            rng: ChaCha8Rng::seed_from_u64(self.config.seed),
        };

        let mut dataset: Vec<Line> = tables
            .iter()
            .cloned()
            .map(|mut l| {
                l.task_type = Some(category);
                l
            })
            .collect();

        for (step, handler) in GenerationStep::ALL.into_iter().zip(category.handlers()) {
            dataset = process(&dataset, step, |line| handler(line, &mut ctx))?;
        }

        let failed = dataset.iter().filter(|l| l.has_failed()).count();
        info!(records = dataset.len(), failed, "category done");
        Ok(dataset)
    }
}
