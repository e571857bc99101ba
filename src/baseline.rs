// src/baseline.rs
//
// Baseline single-table queries around one selected column.

use crate::connector::{quote_ident, ColumnKind, TableMeta};
use crate::line::QueryTemplate;

/// Produces plain, answerable queries that reference `selected_col` as
/// `` `col` `` so later stages can rewrite them.
pub trait BaselineQueryGenerator {
    fn generate(&self, table: &TableMeta, selected_col: &str) -> Vec<QueryTemplate>;
}

/// Built-in generator: projection, distinct, ordering, and kind-specific
/// filters, grouping and aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateQueryGenerator;

fn template(test_category: &str, query: String, question: String) -> QueryTemplate {
    QueryTemplate {
        question,
        query,
        test_category: test_category.to_string(),
    }
}

fn sql_literal_safe(v: &str) -> bool {
    !v.contains('\'')
}

impl BaselineQueryGenerator for TemplateQueryGenerator {
    fn generate(&self, table: &TableMeta, col: &str) -> Vec<QueryTemplate> {
        let Some(meta) = table.column(col) else {
            return Vec::new();
        };

        let t = quote_ident(&table.name);
        let c = quote_ident(col);
        let tbl = table.name.as_str();

        let mut out = vec![
            template(
                "SELECT-single-column",
                format!("SELECT {c} FROM {t}"),
                format!("Show {col} for every row of {tbl}"),
            ),
            template(
                "DISTINCT-single-column",
                format!("SELECT DISTINCT {c} FROM {t}"),
                format!("Show the different values of {col} in {tbl}"),
            ),
            template(
                "ORDERBY-asc",
                format!("SELECT * FROM {t} ORDER BY {c} ASC"),
                format!("Show all rows of {tbl} sorted by {col} in ascending order"),
            ),
            template(
                "ORDERBY-desc",
                format!("SELECT * FROM {t} ORDER BY {c} DESC"),
                format!("Show all rows of {tbl} sorted by {col} in descending order"),
            ),
        ];

        let sample = meta.sample_data.iter().find(|v| sql_literal_safe(v));

        match meta.kind {
            ColumnKind::Categorical => {
                if let Some(v) = sample {
                    out.push(template(
                        "WHERE-categorical",
                        format!("SELECT * FROM {t} WHERE {c} = '{v}'"),
                        format!("Show the rows of {tbl} where {col} is {v}"),
                    ));
                }
                out.push(template(
                    "GROUPBY-count",
                    format!("SELECT {c}, COUNT(*) FROM {t} GROUP BY {c}"),
                    format!("For each {col}, how many rows does {tbl} have?"),
                ));
                out.push(template(
                    "HAVING-count",
                    format!("SELECT {c} FROM {t} GROUP BY {c} HAVING COUNT(*) >= 2"),
                    format!("Which {col} appear at least twice in {tbl}?"),
                ));
            }
            ColumnKind::Numerical => {
                for (agg, word) in [("MAX", "highest"), ("MIN", "lowest"), ("AVG", "average")] {
                    out.push(template(
                        &format!("AGG-{}", agg.to_lowercase()),
                        format!("SELECT {agg}({c}) FROM {t}"),
                        format!("What is the {word} {col} in {tbl}?"),
                    ));
                }
                if let Some(v) = sample.filter(|v| v.parse::<f64>().is_ok()) {
                    out.push(template(
                        "WHERE-numerical",
                        format!("SELECT * FROM {t} WHERE {c} > {v}"),
                        format!("Show the rows of {tbl} where {col} is greater than {v}"),
                    ));
                }
            }
            ColumnKind::Other => {}
        }

        out
    }
}
