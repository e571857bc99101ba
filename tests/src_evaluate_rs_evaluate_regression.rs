// src/evaluate.rs

use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;

use squab::config::EvaluationConfig;
use squab::evaluate::{summarize, Evaluator, Prediction, Scores};

#[test]
fn perfect_and_partial_predictions_score_as_expected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("league.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE roster (team TEXT, player TEXT);
         INSERT INTO roster VALUES ('Lions', 'Ann'), ('Lions', 'Bob'), ('Tigers', 'Ann');",
    )
    .unwrap();
    drop(conn);
    let db = path.to_string_lossy().into_owned();

    let collective = "SELECT `player` FROM `roster` GROUP BY `player` \
                      HAVING COUNT(DISTINCT `team`) = (SELECT COUNT(DISTINCT `team`) FROM `roster`)";
    let distributive = "SELECT DISTINCT `player`, `team` FROM `roster`";

    // extra generation fields are ignored on input
    let predictions: Vec<Prediction> = serde_json::from_value(json!([
        {
            "db_id": "league",
            "db_path": db,
            "task_type": "scope",
            "question": "What player does each team have?",
            "target": [collective, distributive],
            "total_cost": 0.002,
            "predicted_sql": [distributive, "SELECT 'Ann'"]
        },
        {
            "db_path": db,
            "task_type": "column_unanswerable",
            "target": ["SELECT `salary` FROM `roster`"],
            "predicted_sql": "SELECT salary FROM roster"
        },
        {
            "db_path": db,
            "task_type": "scope",
            "target": [collective],
            "predicted_sql": ["SELECT * FROM roster WHERE 1 = (SELECT COUNT(*) FROM roster)"]
        }
    ]))
    .unwrap();

    let mut evaluator = Evaluator::new(EvaluationConfig::default(), Duration::from_secs(10));
    let scored = evaluator.evaluate_all(predictions);

    // `SELECT 'Ann'` returns the collective answer's rows too
    assert_eq!(scored[0].scores, Scores::Ambiguous { precision: 1.0, recall: 1.0, f1: 1.0 });
    assert_eq!(scored[1].scores, Scores::Unanswerable { accuracy: 0.0 });
    assert_eq!(scored[2].scores, Scores::Ambiguous { precision: 0.0, recall: 0.0, f1: 0.0 });

    let summary = summarize(&scored);
    assert_eq!(summary["scope"]["f1"], 0.5);
    assert_eq!(summary["column_unanswerable"]["accuracy"], 0.0);

    let round_trip = serde_json::to_value(&scored[1]).unwrap();
    assert_eq!(round_trip["scores"], json!({"accuracy": 0.0}));
    assert_eq!(round_trip["task_type"], "column_unanswerable");
}
