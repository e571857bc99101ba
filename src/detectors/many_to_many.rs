// src/detectors/many_to_many.rs

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::connector::{Cell, TableConnector};
use crate::error::ConnectorError;

pub const SAMPLE_ROWS: usize = 100;

/// Whether both directions of the sampled pairs fan out.
///
/// True only when some left value maps to two or more distinct right values
/// *and* some right value maps to two or more distinct left values. Rows with
/// a NULL on either side carry no evidence and are skipped.
pub fn is_many_to_many(pairs: &[(Cell, Cell)]) -> bool {
    let mut left: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut right: HashMap<&str, HashSet<&str>> = HashMap::new();

    for (a, b) in pairs {
        let (Some(a), Some(b)) = (a.as_deref(), b.as_deref()) else {
            continue;
        };
        left.entry(a).or_default().insert(b);
        right.entry(b).or_default().insert(a);
    }

    let fans_out = |m: &HashMap<&str, HashSet<&str>>| m.values().any(|s| s.len() >= 2);
    fans_out(&left) && fans_out(&right)
}

/// Every unordered pair of `columns` (in order) related many-to-many.
pub fn many_to_many_pairs(
    connector: &dyn TableConnector,
    table: &str,
    columns: &[String],
) -> Result<Vec<(String, String)>, ConnectorError> {
    let mut found = Vec::new();

    for (i, c1) in columns.iter().enumerate() {
        for c2 in &columns[i + 1..] {
            let pairs = connector.fetch_pairs(table, c1, c2, SAMPLE_ROWS)?;
            if is_many_to_many(&pairs) {
                debug!(table, entity = %c1, component = %c2, "many-to-many pair");
                found.push((c1.clone(), c2.clone()));
            }
        }
    }

    Ok(found)
}
