// src/orchestrator.rs

use std::path::Path;

use rusqlite::Connection;
use tempfile::TempDir;

use squab::baseline::TemplateQueryGenerator;
use squab::config::RunConfig;
use squab::connector::SqliteConnector;
use squab::error::ExternalCallError;
use squab::llm::{Completion, CompletionProvider, EmbeddingProvider, Embeddings, Message};
use squab::orchestrator::Generator;
use squab::{Category, Line};

/// Answers every prompt with one object that satisfies every stage.
struct Oracle;

const REPLY: &str = "```json
{
  \"entity\": \"Team\",
  \"component\": \"player\",
  \"label\": \"person\",
  \"question\": \"Which players are listed?\",
  \"suggested_columns\": [{\"column_name\": \"salary\", \"column_type\": \"numerical\"}],
  \"udf_name\": \"bmi(`height`)\",
  \"udf_output_type\": \"numerical\"
}
```";

impl CompletionProvider for Oracle {
    fn complete(&self, _messages: &[Message]) -> Result<Completion, ExternalCallError> {
        Ok(Completion {
            text: REPLY.to_string(),
            cost: 0.001,
        })
    }
}

/// `player` and `position` point the same way; everything else is orthogonal.
struct Directions;

impl EmbeddingProvider for Directions {
    fn embed(&self, inputs: &[String]) -> Result<Embeddings, ExternalCallError> {
        let vectors = inputs
            .iter()
            .map(|name| match name.as_str() {
                "player" => vec![0.0, 1.0, 0.0, 0.0],
                "position" => vec![0.0, 0.9, 0.1, 0.0],
                "height" => vec![0.0, 0.0, 0.0, 1.0],
                _ => vec![1.0, 0.0, 0.0, 0.0],
            })
            .collect();
        Ok(Embeddings { vectors, cost: 0.0001 })
    }
}

fn league(dir: &Path) -> SqliteConnector {
    let path = dir.join("league.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE roster (team TEXT, player TEXT, position TEXT, height REAL);
         INSERT INTO roster VALUES
             ('Lions', 'Ann', 'Guard', 1.70),
             ('Lions', 'Bob', 'Forward', 1.82),
             ('Tigers', 'Ann', 'Guard', 1.70),
             ('Tigers', 'Cid', 'Center', 1.95),
             ('Bears', 'Bob', 'Forward', 1.82),
             ('Bears', 'Dan', 'Guard', 1.82);
         CREATE TABLE coaches (coach_id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO coaches VALUES (1, 'Dee'), (2, 'Eve');",
    )
    .unwrap();
    drop(conn);
    SqliteConnector::open(&path).unwrap()
}

fn run(dir: &TempDir, tables: Option<&[String]>, categories: &[Category]) -> Vec<Line> {
    let connector = league(dir.path());
    let config = RunConfig::default();
    let generator = Generator {
        connector: &connector,
        completion: Some(&Oracle),
        embedder: Some(&Directions),
        baseline: &TemplateQueryGenerator,
        config: &config,
    };
    generator.generate(tables, categories).unwrap()
}

fn succeeded(lines: &[Line], category: Category) -> Vec<&Line> {
    lines
        .iter()
        .filter(|l| l.task_type == Some(category) && !l.has_failed())
        .collect()
}

#[test]
fn every_category_yields_cases_or_explicit_failures() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&dir, None, &[]);

    // categories appear in registry order
    let order: Vec<usize> = out
        .iter()
        .map(|l| Category::ALL.iter().position(|c| Some(*c) == l.task_type).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] <= w[1]));

    for l in &out {
        if l.has_failed() {
            assert!(!l.has_failed.as_ref().unwrap().is_empty());
        } else {
            assert_eq!(l.question.as_deref(), Some("Which players are listed?"));
            assert!(!l.target.as_ref().unwrap().is_empty());
            assert!(l.test_sub_category.is_some());
        }
    }

    for category in Category::ALL {
        assert!(
            !succeeded(&out, category).is_empty(),
            "no test case generated for {category}"
        );
    }

    // the key-only coaches table cannot yield a scope pattern
    assert!(out
        .iter()
        .filter(|l| l.tbl_name == "coaches" && l.task_type == Some(Category::Scope))
        .all(|l| l.has_failed()));
}

#[test]
fn generated_queries_match_their_category() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&dir, None, &[]);

    let scope = succeeded(&out, Category::Scope);
    assert!(scope.iter().all(|l| l.target.as_ref().unwrap()[0].contains("HAVING COUNT(DISTINCT `team`)")));

    for l in succeeded(&out, Category::ColumnUnanswerable) {
        assert!(l.target.as_ref().unwrap()[0].contains("`salary`"));
    }
    for l in succeeded(&out, Category::CalculationUnanswerable) {
        assert!(l.target.as_ref().unwrap()[0].contains("bmi(`height`)"));
    }

    let vague = succeeded(&out, Category::ColumnAmbiguity);
    for l in &vague {
        let target = l.target.as_ref().unwrap().join(" ");
        assert!(target.contains("`player`") && target.contains("`position`"));
    }
}

#[test]
fn costs_add_up_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&dir, None, &[Category::Scope, Category::ColumnAmbiguity]);

    for l in &out {
        let staged: f64 = l.granular_costs.values().sum();
        assert!((staged - l.total_cost).abs() < 1e-12, "{:?}", l.granular_costs);
    }
}

#[test]
fn same_seed_same_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let first = serde_json::to_string(&run(&dir, None, &[])).unwrap();

    let other = tempfile::tempdir().unwrap();
    let second = serde_json::to_string(&run(&other, None, &[])).unwrap();

    // db_path differs between the two temp dirs; everything else must not
    let strip = |s: &str, dir: &TempDir| s.replace(&dir.path().to_string_lossy().into_owned(), "");
    assert_eq!(strip(&first, &dir), strip(&second, &other));
}

#[test]
fn requested_tables_are_matched_by_similarity() {
    let dir = tempfile::tempdir().unwrap();
    let wanted = vec!["rooster".to_string()];
    let out = run(&dir, Some(&wanted), &[Category::Scope]);

    assert!(!out.is_empty());
    assert!(out.iter().all(|l| l.tbl_name == "roster"));
    assert!(out[0].db_schema_table_examples.contains("team TEXT, -- Example Values: (`"));
}

#[test]
fn unknown_table_generates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let wanted = vec!["orders".to_string()];
    assert!(run(&dir, Some(&wanted), &[]).is_empty());

    // exact names match regardless of case; tables keep schema order
    let other = tempfile::tempdir().unwrap();
    let both = vec!["Coaches".to_string(), "rooster".to_string()];
    let out = run(&other, Some(&both), &[Category::Scope]);
    let mut tables: Vec<&str> = out.iter().map(|l| l.tbl_name.as_str()).collect();
    tables.dedup();
    assert_eq!(tables, ["coaches", "roster"]);
}
