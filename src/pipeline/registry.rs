// src/pipeline/registry.rs
//
// Category -> ordered stage handlers. Plain data, no dispatch hierarchy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquabError};
use crate::handlers::{pattern_identification as pi, relational_metadata as rm, test_generation as tg};
use crate::handlers::HandlerContext;
use crate::line::Line;
use crate::pipeline::Fanout;

/// One stage of one category.
pub type StageHandler = fn(Line, &mut HandlerContext<'_>) -> Result<Fanout>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Attachment,
    Scope,
    ColumnAmbiguity,
    ColumnUnanswerable,
    CalculationUnanswerable,
    OutOfScope,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Attachment,
        Category::Scope,
        Category::ColumnAmbiguity,
        Category::ColumnUnanswerable,
        Category::CalculationUnanswerable,
        Category::OutOfScope,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Attachment => "attachment",
            Category::Scope => "scope",
            Category::ColumnAmbiguity => "column_ambiguity",
            Category::ColumnUnanswerable => "column_unanswerable",
            Category::CalculationUnanswerable => "calculation_unanswerable",
            Category::OutOfScope => "out_of_scope",
        }
    }

    pub fn is_unanswerable(self) -> bool {
        matches!(
            self,
            Category::ColumnUnanswerable | Category::CalculationUnanswerable | Category::OutOfScope
        )
    }

    /// Pattern identification, relational metadata, test generation.
    pub fn handlers(self) -> [StageHandler; 3] {
        match self {
            Category::Attachment => [
                pi::overlapping_columns,
                rm::copy_overlapping_values,
                tg::attachment_tests,
            ],
            Category::Scope => [pi::many_to_many_columns, rm::entity_component, tg::scope_tests],
            Category::ColumnAmbiguity => [pi::semantic_columns, rm::hypernym, tg::vague_tests],
            Category::ColumnUnanswerable => [
                pi::table_snapshot,
                rm::new_attributes,
                tg::column_unanswerable_tests,
            ],
            Category::CalculationUnanswerable => [
                pi::table_snapshot,
                rm::computable_udfs,
                tg::udf_unanswerable_tests,
            ],
            Category::OutOfScope => [
                pi::table_snapshot,
                rm::out_of_scope_udfs,
                tg::udf_unanswerable_tests,
            ],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = SquabError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase().replace('-', "_");
        let cat = match key.as_str() {
            "attachment" | "attach" => Category::Attachment,
            "scope" => Category::Scope,
            "column_ambiguity" | "vague" | "col_amb" => Category::ColumnAmbiguity,
            "column_unanswerable" | "col_unans" => Category::ColumnUnanswerable,
            "calculation_unanswerable" | "calc_unans" => Category::CalculationUnanswerable,
            "out_of_scope" | "oos" => Category::OutOfScope,
            _ => return Err(SquabError::UnknownCategory(s.to_string())),
        };
        Ok(cat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_aliases_resolve() {
        for cat in Category::ALL {
            assert_eq!(cat.name().parse::<Category>().unwrap(), cat);
        }
        assert_eq!("vague".parse::<Category>().unwrap(), Category::ColumnAmbiguity);
        assert_eq!("Calc-Unans".parse::<Category>().unwrap(), Category::CalculationUnanswerable);
        assert!("bogus".parse::<Category>().is_err());
    }

    #[test]
    fn unanswerable_categories() {
        let unans: Vec<_> = Category::ALL.into_iter().filter(|c| c.is_unanswerable()).collect();
        assert_eq!(
            unans,
            vec![
                Category::ColumnUnanswerable,
                Category::CalculationUnanswerable,
                Category::OutOfScope
            ]
        );
    }
}
