// src/detectors/mod.rs
//
// Structural and semantic pattern detectors over table data.

pub mod many_to_many;
pub mod overlapping;
pub mod semantic;

use crate::connector::TableMeta;

pub use many_to_many::{is_many_to_many, many_to_many_pairs};
pub use overlapping::{find_overlapping_values, sample_overlaps, OverlapSample};
pub use semantic::{cluster_columns, similarity_clusters};

const KEY_LIKE: [&str; 3] = ["id", "code", "key"];

/// Columns that are neither keys nor key-like by name, in table order.
///
/// `start_from` restricts the candidates (e.g. to categorical columns);
/// `None` means all columns of the table.
pub fn columns_no_pk_fk(table: &TableMeta, start_from: Option<&[String]>) -> Vec<String> {
    let is_key = |name: &str| {
        table.primary_key.iter().any(|pk| pk == name)
            || table.foreign_keys.iter().any(|fk| fk.parent_column == name)
    };
    let key_like = |name: &str| {
        let lower = name.to_lowercase();
        KEY_LIKE.iter().any(|k| lower.contains(k))
    };

    let candidates: Vec<String> = match start_from {
        Some(cols) => cols.to_vec(),
        None => table.column_names().map(str::to_string).collect(),
    };

    candidates
        .into_iter()
        .filter(|c| !is_key(c) && !key_like(c))
        .collect()
}
