// src/matching.rs
//
// Name matching and vector similarity helpers.

use std::collections::HashMap;

use tracing::{debug, warn};

/* ============================================================
   String similarity
   ============================================================ */

/// Bigram Dice coefficient over normalized text, in `[0, 1]`.
pub fn dice_coefficient(left: &str, right: &str) -> f64 {
    let l = normalize_text(left);
    let r = normalize_text(right);

    if l.is_empty() && r.is_empty() {
        return 1.0;
    }
    if l == r {
        return 1.0;
    }

    let lb = bigrams(&l);
    let rb = bigrams(&r);
    if lb.is_empty() || rb.is_empty() {
        return 0.0;
    }

    let mut rb_map: HashMap<&str, usize> = HashMap::new();
    for b in &rb {
        *rb_map.entry(b.as_str()).or_insert(0) += 1;
    }

    let mut match_count = 0usize;
    for b in &lb {
        if let Some(v) = rb_map.get_mut(b.as_str()) {
            if *v > 0 {
                *v -= 1;
                match_count += 1;
            }
        }
    }

    (2.0 * match_count as f64) / (lb.len() as f64 + rb.len() as f64)
}

/// Lowercase, punctuation and `_` become spaces, whitespace collapsed.
fn normalize_text(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .windows(2)
        .map(|w| format!("{}{}", w[0], w[1]))
        .collect()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}

/// Candidate with the smallest case-insensitive edit distance to `name`.
/// Earlier candidates win ties.
pub fn closest_name<'a, I>(candidates: I, name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let target = name.trim().to_lowercase();
    candidates
        .into_iter()
        .enumerate()
        .min_by_key(|(i, c)| (levenshtein(&c.trim().to_lowercase(), &target), *i))
        .map(|(_, c)| c)
}

/// Lowest Dice score at which a requested name may stand for another one.
pub const MIN_NAME_SIMILARITY: f64 = 0.5;

/// Map requested names onto available names.
///
/// Case-insensitive exact matches are taken first. Each remaining request
/// gets the most Dice-similar name still free, if it scores at least
/// `MIN_NAME_SIMILARITY`; otherwise the request is dropped. Every available
/// name is handed out at most once and the result follows request order.
pub fn resolve_names(requested: &[String], available: &[String]) -> Vec<String> {
    let mut taken = vec![false; available.len()];
    let mut picks: Vec<Option<usize>> = vec![None; requested.len()];

    for (r, want) in requested.iter().enumerate() {
        let exact = (0..available.len()).find(|&i| !taken[i] && available[i].eq_ignore_ascii_case(want.trim()));
        if let Some(i) = exact {
            taken[i] = true;
            picks[r] = Some(i);
        }
    }

    for (r, want) in requested.iter().enumerate() {
        if picks[r].is_some() {
            continue;
        }

        let best = available
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken[*i])
            .map(|(i, have)| (i, dice_coefficient(want, have)))
            .fold(None::<(usize, f64)>, |best, (i, score)| match best {
                Some((_, s)) if s >= score => best,
                _ => Some((i, score)),
            });

        match best {
            Some((i, score)) if score >= MIN_NAME_SIMILARITY => {
                debug!(requested = %want, matched = %available[i], score, "fuzzy table match");
                taken[i] = true;
                picks[r] = Some(i);
            }
            _ => warn!(requested = %want, "no table close enough to the requested name"),
        }
    }

    picks
        .into_iter()
        .flatten()
        .map(|i| available[i].clone())
        .collect()
}

/// Replace whole-word occurrences of `word` in `text`.
///
/// A match counts only when the characters around it are not alphanumeric
/// and not `_`, so `team` leaves `team_stats` alone.
pub fn replace_word(text: &str, word: &str, with: &str) -> String {
    if word.is_empty() {
        return text.to_string();
    }

    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for (start, _) in text.match_indices(word) {
        if start < last {
            continue;
        }
        let end = start + word.len();
        let before = text[..start].chars().next_back().is_some_and(is_word_char);
        let after = text[end..].chars().next().is_some_and(is_word_char);
        if before || after {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(with);
        last = end;
    }

    out.push_str(&text[last..]);
    out
}

/* ============================================================
   Vectors
   ============================================================ */

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dice_ignores_case_and_separators() {
        assert_eq!(dice_coefficient("Player_Stats", "player stats"), 1.0);
        assert!(dice_coefficient("players", "player") > dice_coefficient("players", "teams"));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn closest_name_snaps_model_output_to_columns() {
        let cols = ["team_name", "player_name", "season"];
        assert_eq!(closest_name(cols.iter().copied(), "Player name"), Some("player_name"));
        assert_eq!(closest_name(Vec::<&str>::new(), "x"), None);
    }

    #[test]
    fn resolve_names_prefers_exact_matches() {
        let available = vec!["players".to_string(), "teams".to_string()];
        let requested = vec!["player".to_string(), "Players".to_string(), "team".to_string()];
        let got = resolve_names(&requested, &available);
        // `player` loses `players` to the exact request and nothing else is close
        assert_eq!(got, vec!["players".to_string(), "teams".to_string()]);

        let got = resolve_names(&["player".to_string()], &available);
        assert_eq!(got, vec!["players".to_string()]);
    }

    #[test]
    fn unknown_table_selects_nothing() {
        let available = vec!["roster".to_string(), "coaches".to_string()];
        assert!(resolve_names(&["orders".to_string()], &available).is_empty());
        assert_eq!(
            resolve_names(&["rooster".to_string()], &available),
            vec!["roster".to_string()]
        );
    }

    #[test]
    fn replace_word_skips_longer_identifiers() {
        assert_eq!(
            replace_word("Show team for every row of team_stats", "team", "club"),
            "Show club for every row of team_stats"
        );
        assert_eq!(replace_word("team, team.", "team", "club"), "club, club.");
        assert_eq!(replace_word("teammate", "team", "club"), "teammate");
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }
}
