// src/evaluate.rs
//
// Scoring model predictions against generated test cases.

use std::collections::btree_map::Entry as BEntry;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EvaluationConfig;
use crate::connector::{Rows, SqliteConnector, TableConnector};
use crate::pipeline::registry::Category;

const WRITE_STATEMENTS: [&str; 6] = [
    "insert into ",
    "update ",
    "delete ",
    "create table ",
    "drop table ",
    "alter table ",
];

/// One generated test case plus what a model answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub db_path: String,
    pub task_type: Category,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub target: Vec<String>,
    /// Model output; a single string is accepted as a one-element list.
    #[serde(deserialize_with = "one_or_many")]
    pub predicted_sql: Vec<String>,
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scores {
    Ambiguous { precision: f64, recall: f64, f1: f64 },
    Unanswerable { accuracy: f64 },
}

impl Scores {
    fn metrics(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Scores::Ambiguous { precision, recall, f1 } => {
                vec![("precision", precision), ("recall", recall), ("f1", f1)]
            }
            Scores::Unanswerable { accuracy } => vec![("accuracy", accuracy)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub scores: Scores,
}

/* ============================================================
   Scoring kernels
   ============================================================ */

fn is_write(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    WRITE_STATEMENTS.iter().any(|op| lower.contains(op))
}

fn normalized(mut rows: Rows, keep_order: bool) -> Rows {
    if !keep_order {
        rows.sort();
    }
    rows
}

/// 1.0 when both queries return the same rows, else 0.0.
///
/// Row order only matters when the target sorts. Write statements, errors
/// and timeouts all score 0.
pub fn execution_accuracy(connector: &dyn TableConnector, target: &str, predicted: &str, timeout: Duration) -> f64 {
    if is_write(predicted) {
        return 0.0;
    }

    let run = |sql: &str| connector.run_query_with_timeout(sql, timeout);
    let (expected, got) = match (run(target), run(predicted)) {
        (Ok(e), Ok(g)) => (e, g),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "query failed during evaluation");
            return 0.0;
        }
    };

    let keep_order = target.to_lowercase().contains("order by");
    if normalized(expected, keep_order) == normalized(got, keep_order) {
        1.0
    } else {
        0.0
    }
}

/// Precision over predictions, recall over targets, both counting a query as
/// matched when any counterpart exceeds `threshold`.
pub fn score_ambiguous(
    connector: &dyn TableConnector,
    targets: &[String],
    predictions: &[String],
    threshold: f64,
    timeout: Duration,
) -> Scores {
    let mut target_hit = vec![false; targets.len()];
    let mut prediction_hit = vec![false; predictions.len()];

    for (p, predicted) in predictions.iter().enumerate() {
        for (t, target) in targets.iter().enumerate() {
            if execution_accuracy(connector, target, predicted, timeout) > threshold {
                target_hit[t] = true;
                prediction_hit[p] = true;
            }
        }
    }

    let ratio = |hits: &[bool]| {
        if hits.is_empty() {
            0.0
        } else {
            hits.iter().filter(|h| **h).count() as f64 / hits.len() as f64
        }
    };
    let precision = ratio(&prediction_hit);
    let recall = ratio(&target_hit);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Scores::Ambiguous { precision, recall, f1 }
}

pub fn score_unanswerable(prediction: &str, marker: &str) -> Scores {
    let hit = prediction.to_lowercase().contains(&marker.to_lowercase());
    Scores::Unanswerable {
        accuracy: if hit { 1.0 } else { 0.0 },
    }
}

/* ============================================================
   Evaluator
   ============================================================ */

/// Scores predictions, keeping one read-only connection per database.
pub struct Evaluator {
    config: EvaluationConfig,
    timeout: Duration,
    connectors: HashMap<String, SqliteConnector>,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            connectors: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, prediction: &Prediction) -> Scores {
        if prediction.task_type.is_unanswerable() {
            let answer = prediction.predicted_sql.first().map(String::as_str).unwrap_or("");
            return score_unanswerable(answer, &self.config.unanswerable_marker);
        }

        let zero = Scores::Ambiguous {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
        let connector = match self.connectors.entry(prediction.db_path.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => match SqliteConnector::open(&prediction.db_path) {
                Ok(c) => v.insert(c),
                Err(e) => {
                    warn!(db = %prediction.db_path, error = %e, "cannot open database; scoring 0");
                    return zero;
                }
            },
        };

        score_ambiguous(
            connector,
            &prediction.target,
            &prediction.predicted_sql,
            self.config.match_threshold,
            self.timeout,
        )
    }

    pub fn evaluate_all(&mut self, predictions: Vec<Prediction>) -> Vec<Scored> {
        predictions
            .into_iter()
            .map(|prediction| {
                let scores = self.evaluate(&prediction);
                debug!(category = prediction.task_type.name(), ?scores, "scored");
                Scored { prediction, scores }
            })
            .collect()
    }
}

/// Mean of every metric per category.
pub fn summarize(scored: &[Scored]) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut sums: BTreeMap<String, (usize, BTreeMap<String, f64>)> = BTreeMap::new();

    for s in scored {
        let slot = match sums.entry(s.prediction.task_type.name().to_string()) {
            BEntry::Occupied(e) => e.into_mut(),
            BEntry::Vacant(v) => v.insert((0, BTreeMap::new())),
        };
        slot.0 += 1;
        for (metric, value) in s.scores.metrics() {
            *slot.1.entry(metric.to_string()).or_default() += value;
        }
    }

    sums.into_iter()
        .map(|(category, (n, totals))| {
            let means = totals.into_iter().map(|(m, v)| (m, v / n as f64)).collect();
            (category, means)
        })
        .collect()
}
