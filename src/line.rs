//! line.rs
//!
//! The record that flows through every stage, plus its cost bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connector::TableMeta;
use crate::pipeline::registry::Category;
use crate::pipeline::GenerationStep;

/* ============================================================
   Stage outputs
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityComponent {
    pub entity: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappingValues {
    pub entity: String,
    pub component: String,
    pub column_to_project: String,
    pub entity_values: (String, String),
    pub component_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarColumns {
    pub similar_columns: Vec<String>,
}

/// Snapshot used by the unanswerable categories, which need no detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    pub columns: Vec<String>,
    pub categorical_column: Option<String>,
    pub numerical_column: Option<String>,
}

/// Stage-1 output. Untagged so each shape serializes as its bare fields;
/// variant order matters for deserialization (most specific first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternRecord {
    OverlappingValues(OverlappingValues),
    EntityComponent(EntityComponent),
    SimilarColumns(SimilarColumns),
    TableColumns(TableColumns),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Categorical,
    Numerical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttribute {
    pub column_name: String,
    pub column_type: ValueKind,
    pub col_to_use_for_generation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdfSpec {
    /// Call form, e.g. `bmi(weight, height)`.
    pub udf_name: String,
    pub udf_output_type: ValueKind,
    pub col_to_use_for_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udf_python_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationalMetadata {
    EntityComponent(EntityComponent),
    OverlappingValues(OverlappingValues),
    Hypernym { label: String },
    NewAttribute(NewAttribute),
    Udf(UdfSpec),
}

/// One SQL interpretation with its template question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub question: String,
    pub query: String,
    pub test_category: String,
}

/* ============================================================
   Line
   ============================================================ */

/// Keys the precondition verifier can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKey {
    DbId,
    DbPath,
    DbSchema,
    DbSchemaTable,
    DbSchemaTableExamples,
    TblName,
    PatternIdentification,
    RelationalMetadata,
}

impl LineKey {
    pub fn name(self) -> &'static str {
        match self {
            LineKey::DbId => "db_id",
            LineKey::DbPath => "db_path",
            LineKey::DbSchema => "db_schema",
            LineKey::DbSchemaTable => "db_schema_table",
            LineKey::DbSchemaTableExamples => "db_schema_table_examples",
            LineKey::TblName => "tbl_name",
            LineKey::PatternIdentification => "pattern_identification",
            LineKey::RelationalMetadata => "relational_metadata",
        }
    }
}

/// One in-progress test-case candidate.
///
/// `Clone` is a full deep copy: siblings produced by a fan-out never share
/// state with each other or with their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /* identity */
    pub db_id: String,
    pub db_path: String,
    pub db_schema: String,
    pub db_schema_table: String,
    pub db_schema_table_examples: String,
    pub tbl_name: String,
    pub table: TableMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<Category>,

    /* stage outputs */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_identification: Option<PatternRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relational_metadata: Option<RelationalMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<QueryTemplate>>,

    /* bookkeeping */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_failed: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub granular_costs: BTreeMap<String, f64>,
}

impl Line {
    pub fn new(
        db_id: impl Into<String>,
        db_path: impl Into<String>,
        db_schema: impl Into<String>,
        db_schema_table: impl Into<String>,
        db_schema_table_examples: impl Into<String>,
        table: TableMeta,
    ) -> Self {
        Self {
            db_id: db_id.into(),
            db_path: db_path.into(),
            db_schema: db_schema.into(),
            db_schema_table: db_schema_table.into(),
            db_schema_table_examples: db_schema_table_examples.into(),
            tbl_name: table.name.clone(),
            table,
            task_type: None,
            pattern_identification: None,
            relational_metadata: None,
            question: None,
            target: None,
            test_sub_category: None,
            templates: None,
            has_failed: None,
            total_cost: 0.0,
            granular_costs: BTreeMap::new(),
        }
    }

    pub fn has_key(&self, key: LineKey) -> bool {
        match key {
            LineKey::DbId => !self.db_id.is_empty(),
            LineKey::DbPath => !self.db_path.is_empty(),
            LineKey::DbSchema => !self.db_schema.is_empty(),
            LineKey::DbSchemaTable => !self.db_schema_table.is_empty(),
            LineKey::DbSchemaTableExamples => !self.db_schema_table_examples.is_empty(),
            LineKey::TblName => !self.tbl_name.is_empty(),
            LineKey::PatternIdentification => self.pattern_identification.is_some(),
            LineKey::RelationalMetadata => self.relational_metadata.is_some(),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.has_failed.is_some()
    }

    /// Record an expected, non-fatal failure for `step`.
    pub fn mark_failed(&mut self, step: GenerationStep, reason: impl Into<String>) {
        self.has_failed
            .get_or_insert_with(BTreeMap::new)
            .insert(step.key().to_string(), reason.into());
    }

    /// Attribute `cost` to `step` on this record.
    pub fn charge(&mut self, step: GenerationStep, cost: f64) {
        self.granular_costs.insert(step.key().to_string(), cost);
        self.total_cost += cost;
    }

    pub fn stage_cost(&self, step: GenerationStep) -> f64 {
        self.granular_costs.get(step.key()).copied().unwrap_or(0.0)
    }

    /// Split one upstream call of cost `cost` across one descendant per item.
    ///
    /// Each descendant is a deep copy of `self` charged `cost / items.len()`,
    /// then handed to `apply` together with its item. No items, no
    /// descendants.
    pub fn fan_out<T>(
        &self,
        step: GenerationStep,
        cost: f64,
        items: Vec<T>,
        mut apply: impl FnMut(&mut Line, T),
    ) -> Vec<Line> {
        if items.is_empty() {
            return Vec::new();
        }

        let share = cost / items.len() as f64;
        items
            .into_iter()
            .map(|item| {
                let mut child = self.clone();
                child.charge(step, share);
                apply(&mut child, item);
                child
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::connector::{ColumnKind, ColumnMeta, TableMeta};

    pub fn column(name: &str, kind: ColumnKind) -> ColumnMeta {
        ColumnMeta {
            name: name.to_string(),
            declared_type: match kind {
                ColumnKind::Numerical => "INTEGER".to_string(),
                _ => "TEXT".to_string(),
            },
            kind,
            sample_data: Vec::new(),
        }
    }

    pub fn line(tbl_name: &str, columns: Vec<ColumnMeta>) -> Line {
        let table = TableMeta {
            name: tbl_name.to_string(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        };
        Line::new(
            "db",
            "db.sqlite",
            "CREATE TABLE t (a TEXT)",
            "CREATE TABLE t (a TEXT)",
            "CREATE TABLE t (a TEXT)",
            table,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::connector::ColumnKind;
    use proptest::prelude::*;

    #[test]
    fn pattern_shapes_serialize_without_tags() {
        let p = PatternRecord::EntityComponent(EntityComponent {
            entity: "team".into(),
            component: "player".into(),
        });
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, serde_json::json!({"entity": "team", "component": "player"}));

        let overlap = PatternRecord::OverlappingValues(OverlappingValues {
            entity: "a".into(),
            component: "b".into(),
            column_to_project: "c".into(),
            entity_values: ("x".into(), "y".into()),
            component_value: "z".into(),
        });
        let raw = serde_json::to_string(&overlap).unwrap();
        let back: PatternRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, overlap);
    }

    #[test]
    fn mark_failed_keeps_reason_per_stage() {
        let mut l = fixtures::line("t", vec![fixtures::column("a", ColumnKind::Categorical)]);
        assert!(!l.has_failed());
        l.mark_failed(GenerationStep::PatternIdentification, "nothing");
        assert!(l.has_failed());
        assert_eq!(
            l.has_failed.as_ref().unwrap().get("pattern_identification"),
            Some(&"nothing".to_string())
        );
    }

    #[test]
    fn fan_out_descendants_are_independent() {
        let parent = fixtures::line("t", vec![fixtures::column("a", ColumnKind::Categorical)]);
        let mut kids = parent.fan_out(GenerationStep::RelationalMetadata, 1.0, vec!["x", "y"], |l, q| {
            l.question = Some(q.to_string());
        });

        kids[0].question = Some("changed".into());
        assert_eq!(kids[1].question.as_deref(), Some("y"));
        assert!(parent.question.is_none());
        assert_eq!(parent.total_cost, 0.0);
    }

    #[test]
    fn fan_out_of_nothing_is_empty() {
        let parent = fixtures::line("t", Vec::new());
        let kids = parent.fan_out(GenerationStep::PatternIdentification, 3.0, Vec::<u8>::new(), |_, _| {});
        assert!(kids.is_empty());
    }

    proptest! {
        #[test]
        fn fan_out_conserves_cost(cost in 0.0f64..100.0, n in 1usize..40, prior in 0.0f64..10.0) {
            let mut parent = fixtures::line("t", Vec::new());
            parent.total_cost = prior;
            let kids = parent.fan_out(GenerationStep::RelationalMetadata, cost, vec![(); n], |_, _| {});

            let sum: f64 = kids.iter().map(|k| k.stage_cost(GenerationStep::RelationalMetadata)).sum();
            prop_assert!((sum - cost).abs() < 1e-9);
            for k in &kids {
                let expected = prior + cost / n as f64;
                prop_assert!((k.total_cost - expected).abs() < 1e-9);
            }
        }
    }
}
