// src/llm/prompt.rs
//
// Prompt templates with `{{ name }}` placeholders, plus the built-in defaults.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::config::FewShot;
use crate::llm::Message;
use crate::pipeline::registry::Category;

pub type Vars = BTreeMap<String, String>;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static pattern")
    })
}

/// Substitute `{{ name }}` from `vars`; unknown names render empty.
pub fn render(template: &str, vars: &Vars) -> String {
    placeholder()
        .replace_all(template, |c: &Captures<'_>| {
            vars.get(&c[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// System, then one user/assistant exchange per few-shot, then the real user turn.
pub fn build_messages(system: Option<&str>, user: &str, few_shots: &[FewShot], vars: &Vars) -> Vec<Message> {
    let mut out = Vec::with_capacity(2 + few_shots.len() * 2);

    if let Some(s) = system {
        out.push(Message::system(s.trim()));
    }
    for shot in few_shots {
        out.push(Message::user(render(user, &shot.vars)));
        out.push(Message::assistant(shot.assistant_answer.clone()));
    }
    out.push(Message::user(render(user, vars)));

    out
}

/* ============================================================
   Relational metadata
   ============================================================ */

pub const ENTITY_COMPONENT_SYSTEM: &str = r#"
You decide how two column names relate. One of them names an Entity, the other a Component:
a part, attribute or element that instances of the entity contain.

# Steps
1. Decide which name is the Entity.
2. Decide which name is the Component.
3. Check that the component is a meaningful part of the entity.

# Output
Return a JSON object enclosed in ```json ``` with exactly two keys:
```json
{
  "entity": "the column that is the entity",
  "component": "the column that is the component"
}
```
Example: "Engine", "Car" -> {"entity": "Car", "component": "Engine"}
"#;

pub const ENTITY_COMPONENT_USER: &str = r#"
## Database
{{ database }}

## Columns
{{ pattern_identification }}
"#;

pub const HYPERNYM_SYSTEM: &str = r#"
You receive a table schema and a set of semantically related columns, such as "First Name" and
"Last Name". Produce one short label that covers every column of the set, such as "Name".
The label must not clash with any existing column name and must make sense for the table.

# Output
Return a JSON object enclosed in ```json ```:
```json
{
  "label": "the label covering the set"
}
```
If no sensible label exists, return ```json {}```.
"#;

pub const HYPERNYM_USER: &str = r#"
## Table Schema
{{ tbl_schema }}

## Related columns
{{ cols }}
"#;

pub const NEW_ATTRIBUTES_SYSTEM: &str = r#"
You receive a table schema. Propose columns a user might plausibly ask about that the table does
NOT contain and that cannot be derived from existing columns. Each proposal is categorical or
numerical.

# Output
Return a JSON object enclosed in ```json ```:
```json
{
  "suggested_columns": [
    {"column_name": "name_of_missing_column", "column_type": "categorical"}
  ]
}
```
"#;

pub const NEW_ATTRIBUTES_USER: &str = r#"
## Table Schema
{{ tbl_schema }}
"#;

pub const COMPUTABLE_UDF_SYSTEM: &str = r#"
You receive a table schema. Propose user-defined SQL functions whose result can be computed from
existing columns but that the database does not provide (for example a body-mass index from weight
and height). For every function emit a ```json ``` block followed by a ```python ``` block with
its implementation:
```json
{"udf_name": "function_name(`col1`, `col2`)", "udf_output_type": "numerical"}
```
`udf_output_type` is "numerical" or "categorical". Arguments are backtick-quoted column names.
"#;

pub const OUT_OF_SCOPE_UDF_SYSTEM: &str = r#"
You receive a table schema. Propose user-defined SQL functions that sound relevant to the table
but whose result cannot be computed from its data alone (for example a sentiment score or a
forecast needing external knowledge). For every function emit a ```json ``` block followed by a
```python ``` block sketching it:
```json
{"udf_name": "function_name(`col1`)", "udf_output_type": "categorical"}
```
`udf_output_type` is "numerical" or "categorical". Arguments are backtick-quoted column names.
"#;

pub const UDF_USER: &str = r#"
## Table Schema
{{ tbl_schema }}
"#;

/* ============================================================
   Question generation
   ============================================================ */

pub const QUESTION_SYSTEM: &str = r#"
You write one natural-language question for a text-to-SQL benchmark. You receive a definition of
the phenomenon to reproduce, the SQL queries that are the valid interpretations of the question,
optional metadata and the database.

Guidelines:
- Replace raw table and column names with plain words, preferably synonyms.
- Keep the question short but keep every part of the request, including ordering.
- The question must stay consistent with every interpretation and preserve the phenomenon.
- Leave out the projected column when it can be inferred.

# Output
```json
{
  "question": "the generated question"
}
```
"#;

pub const QUESTION_USER: &str = r#"
## Definition
{{ definition }}

## Queries
{{ queries }}

## Metadata
{{ metadata }}

## Database
{{ database }}
"#;

/// What the question generator is asked to reproduce for `category`.
pub fn definition(category: Category) -> &'static str {
    match category {
        Category::Attachment => {
            "Attachment ambiguity: two entity values are joined by a relative clause and it is unclear \
             whether a condition on the component applies to the second value only or to both. It arises \
             when distinct entity values share the same component value."
        }
        Category::Scope => {
            "Scope ambiguity: with a many-to-many relation between an entity and its components it is \
             unclear whether the question asks for the components common to all entities (collective \
             reading) or for the components of each entity separately (distributive reading)."
        }
        Category::ColumnAmbiguity => {
            "Column ambiguity: the question uses a general term that may refer to any of several \
             semantically close columns, or to all of them together."
        }
        Category::ColumnUnanswerable => {
            "Column unanswerability: the question asks about an attribute the table does not store, \
             so it cannot be answered from the database."
        }
        Category::CalculationUnanswerable => {
            "Calculation unanswerability: the question needs a computation the database does not \
             provide, even though its inputs are present."
        }
        Category::OutOfScope => {
            "Out-of-scope: the question needs knowledge outside the database and cannot be answered \
             from its data."
        }
    }
}
