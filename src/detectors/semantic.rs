// src/detectors/semantic.rs
//
// Groups column names whose embeddings are close.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::matching::cosine_similarity;

/// Neighbour budget for `n` columns.
pub fn at_most_k(n: usize) -> usize {
    (n / 2).max(2)
}

/// Cluster indexes from a full pairwise similarity matrix.
///
/// Only the lower triangle is considered, so each unordered pair counts once
/// (for the later of its two columns). Similarities below `threshold` and the
/// diagonal are dropped. Each column takes its `at_most_k` best neighbours,
/// ranked by similarity descending then index ascending. Clusters list member
/// indexes in ascending order; duplicates and strict subsets of another
/// cluster are removed, as are singletons.
pub fn similarity_clusters(sim: &[Vec<f64>], threshold: f64) -> Vec<Vec<usize>> {
    let n = sim.len();
    let k = at_most_k(n);

    let mut clusters: Vec<BTreeSet<usize>> = Vec::new();
    for i in 0..n {
        let mut neighbours: Vec<(usize, f64)> = (0..i)
            .map(|j| (j, sim[i].get(j).copied().unwrap_or(0.0)))
            .filter(|(_, s)| *s >= threshold && *s != 0.0)
            .collect();

        neighbours.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        neighbours.truncate(k);

        if neighbours.is_empty() {
            continue;
        }

        let mut cluster: BTreeSet<usize> = neighbours.into_iter().map(|(j, _)| j).collect();
        cluster.insert(i);
        if !clusters.contains(&cluster) {
            clusters.push(cluster);
        }
    }

    let maximal: Vec<Vec<usize>> = clusters
        .iter()
        .filter(|c| {
            !clusters
                .iter()
                .any(|other| other.len() > c.len() && c.is_subset(other))
        })
        .filter(|c| c.len() >= 2)
        .map(|c| c.iter().copied().collect())
        .collect();

    maximal
}

/// Cluster `columns` given one embedding vector per column.
pub fn cluster_columns(columns: &[String], vectors: &[Vec<f64>], threshold: f64) -> Vec<Vec<String>> {
    let sim: Vec<Vec<f64>> = vectors
        .iter()
        .map(|a| vectors.iter().map(|b| cosine_similarity(a, b)).collect())
        .collect();

    similarity_clusters(&sim, threshold)
        .into_iter()
        .map(|idx| idx.into_iter().filter_map(|i| columns.get(i).cloned()).collect())
        .collect()
}
