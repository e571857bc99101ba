// src/detectors/overlapping.rs
//
// Entity values whose component-value sets intersect.

use std::collections::HashSet;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;

use crate::connector::Cell;

pub const SAMPLE_ROWS: usize = 50;
pub const MAX_PAIRS_PER_COMBINATION: usize = 2;

/// Shared component values for one pair of entity values.
pub type Overlap = ((String, String), Vec<String>);

/// One sampled pattern candidate: an entity-value pair and one shared value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapSample {
    pub entity_values: (String, String),
    pub component_value: String,
}

fn unsafe_literal(v: &str) -> bool {
    v.contains('\'')
}

/// Pairs of distinct entity values with a non-empty component intersection.
///
/// Values are kept in first-seen order, so the result is deterministic for a
/// given row order. Values carrying a quote are skipped on both sides, and
/// NULL cells are ignored.
pub fn find_overlapping_values(rows: &[(Cell, Cell)]) -> Vec<Overlap> {
    /* ---------- entity -> ordered component set ---------- */
    let mut entities: Vec<(&str, Vec<&str>)> = Vec::new();
    for (e, c) in rows {
        let (Some(e), Some(c)) = (e.as_deref(), c.as_deref()) else {
            continue;
        };
        match entities.iter_mut().find(|(name, _)| *name == e) {
            Some((_, comps)) => {
                if !comps.contains(&c) {
                    comps.push(c);
                }
            }
            None => entities.push((e, vec![c])),
        }
    }

    /* ---------- pairwise intersections ---------- */
    let mut out = Vec::new();
    for (i, (v1, comps1)) in entities.iter().enumerate() {
        if unsafe_literal(v1) {
            continue;
        }
        for (v2, comps2) in &entities[i + 1..] {
            if unsafe_literal(v2) {
                continue;
            }

            let other: HashSet<&str> = comps2.iter().copied().collect();
            let shared: Vec<String> = comps1
                .iter()
                .filter(|c| other.contains(*c) && !unsafe_literal(c))
                .map(|c| c.to_string())
                .collect();

            if !shared.is_empty() {
                out.push(((v1.to_string(), v2.to_string()), shared));
            }
        }
    }

    out
}

/// Pick at most two overlaps and one shared value from each.
pub fn sample_overlaps<R: Rng + ?Sized>(overlaps: &[Overlap], rng: &mut R) -> Vec<OverlapSample> {
    let amount = overlaps.len().min(MAX_PAIRS_PER_COMBINATION);
    let mut picked: Vec<usize> = (0..overlaps.len()).choose_multiple(rng, amount);
    picked.sort_unstable();

    picked
        .into_iter()
        .filter_map(|i| {
            let (pair, shared) = &overlaps[i];
            shared.choose(rng).map(|v| OverlapSample {
                entity_values: pair.clone(),
                component_value: v.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rows(e: &[&str], c: &[&str]) -> Vec<(Cell, Cell)> {
        e.iter()
            .zip(c)
            .map(|(a, b)| (Some(a.to_string()), Some(b.to_string())))
            .collect()
    }

    #[test]
    fn only_intersecting_pairs_are_reported() {
        let found = find_overlapping_values(&rows(
            &["e1", "e1", "e2", "e2", "e3"],
            &["c1", "c2", "c1", "c3", "c4"],
        ));
        assert_eq!(
            found,
            vec![(("e1".to_string(), "e2".to_string()), vec!["c1".to_string()])]
        );
    }

    #[test]
    fn quoted_values_are_skipped() {
        let found = find_overlapping_values(&rows(
            &["O'Neil", "O'Neil", "Smith", "Smith", "Jones"],
            &["c1", "it's", "c1", "it's", "it's"],
        ));
        assert_eq!(found, Vec::<Overlap>::new());

        let found = find_overlapping_values(&rows(&["a", "a", "b", "b"], &["x", "it's", "x", "it's"]));
        assert_eq!(found, vec![(("a".to_string(), "b".to_string()), vec!["x".to_string()])]);
    }

    #[test]
    fn sampling_is_bounded_and_seeded() {
        let overlaps: Vec<Overlap> = (0..5)
            .map(|i| ((format!("a{i}"), format!("b{i}")), vec!["x".to_string(), "y".to_string()]))
            .collect();

        let first = sample_overlaps(&overlaps, &mut ChaCha8Rng::seed_from_u64(7));
        let second = sample_overlaps(&overlaps, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(first.iter().all(|s| s.component_value == "x" || s.component_value == "y"));

        assert!(sample_overlaps(&[], &mut ChaCha8Rng::seed_from_u64(7)).is_empty());
    }
}
