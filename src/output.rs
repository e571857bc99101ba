// src/output.rs
//
// Dataset files and the per-stage failure summary derived from them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::line::Line;

/// Write `lines` as a pretty-printed JSON array, creating parent dirs.
pub fn write_dataset(path: &Path, lines: &[Line]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(lines)?;
    fs::write(path, text)?;
    info!(path = %path.display(), records = lines.len(), "dataset written");
    Ok(())
}

pub fn read_dataset(path: &Path) -> Result<Vec<Line>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub records: usize,
    pub generated: usize,
    pub failed: usize,
    /// Failed records keyed by the stage that marked them.
    pub failed_by_stage: BTreeMap<String, usize>,
    pub cost: f64,
}

/// Counts computed from a finished dataset alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub total_cost: f64,
    pub categories: BTreeMap<String, CategoryCounts>,
}

impl FailureSummary {
    pub fn from_lines(lines: &[Line]) -> Self {
        let mut categories: BTreeMap<String, CategoryCounts> = BTreeMap::new();

        for line in lines {
            let key = line
                .task_type
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "untagged".to_string());
            let entry = categories.entry(key).or_default();

            entry.records += 1;
            entry.cost += line.total_cost;
            match &line.has_failed {
                Some(reasons) => {
                    entry.failed += 1;
                    for stage in reasons.keys() {
                        *entry.failed_by_stage.entry(stage.clone()).or_default() += 1;
                    }
                }
                None => entry.generated += 1,
            }
        }

        Self {
            generated_at: Utc::now(),
            total_records: lines.len(),
            total_cost: lines.iter().map(|l| l.total_cost).sum(),
            categories,
        }
    }

    /// Plain-text table for the terminal.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<26} {:>8} {:>10} {:>8} {:>10}\n",
            "category", "records", "generated", "failed", "cost"
        );
        for (name, c) in &self.categories {
            out.push_str(&format!(
                "{:<26} {:>8} {:>10} {:>8} {:>10.4}\n",
                name, c.records, c.generated, c.failed, c.cost
            ));
            for (stage, n) in &c.failed_by_stage {
                out.push_str(&format!("  {stage:<24} {n:>8}\n"));
            }
        }
        out.push_str(&format!(
            "{:<26} {:>8} {:>10} {:>8} {:>10.4}\n",
            "total", self.total_records, "", "", self.total_cost
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ColumnKind;
    use crate::line::fixtures::{column, line};
    use crate::pipeline::registry::Category;
    use crate::pipeline::GenerationStep;

    fn tagged(category: Category) -> Line {
        let mut l = line("t", vec![column("a", ColumnKind::Categorical)]);
        l.task_type = Some(category);
        l
    }

    #[test]
    fn counts_failures_per_stage() {
        let mut a = tagged(Category::Scope);
        a.charge(GenerationStep::PatternIdentification, 0.0);
        a.mark_failed(GenerationStep::PatternIdentification, "No many-to-many relationships found.");

        let mut b = tagged(Category::Scope);
        b.charge(GenerationStep::RelationalMetadata, 0.25);

        let mut c = tagged(Category::OutOfScope);
        c.mark_failed(GenerationStep::TestGeneration, "No templates generated.");

        let summary = FailureSummary::from_lines(&[a, b, c]);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.total_cost, 0.25);

        let scope = &summary.categories["scope"];
        assert_eq!((scope.records, scope.generated, scope.failed), (2, 1, 1));
        assert_eq!(scope.failed_by_stage["pattern_identification"], 1);
        assert_eq!(summary.categories["out_of_scope"].failed_by_stage["test_generation"], 1);

        assert!(summary.render().contains("pattern_identification"));
    }

    #[test]
    fn dataset_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/dataset.json");
        let lines = vec![tagged(Category::Attachment)];

        write_dataset(&path, &lines).unwrap();
        assert_eq!(read_dataset(&path).unwrap(), lines);
    }
}
