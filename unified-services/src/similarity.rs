//! String similarity scores on a 0 - 100 scale

use std::collections::BTreeSet;

/// Normalized Indel similarity between two strings
///
/// Returns `100 * 2 * LCS / (len(a) + len(b))`, so identical strings score
/// 100 and strings with no common subsequence score 0. Two empty strings are
/// identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    100.0 * (2 * lcs_len(&a, &b)) as f64 / total as f64
}

/// Length of the longest common subsequence, single-row DP
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

/// Order-insensitive token overlap score
///
/// Splits both inputs into whitespace tokens, then compares the sorted
/// intersection against each side's intersection-plus-remainder. A full
/// subset match scores 100; either side empty scores 0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let join = |set: Vec<&str>| set.join(" ");
    let intersection = join(tokens_a.intersection(&tokens_b).copied().collect());
    let diff_ab = join(tokens_a.difference(&tokens_b).copied().collect());
    let diff_ba = join(tokens_b.difference(&tokens_a).copied().collect());

    if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let combine = |diff: &str| {
        if intersection.is_empty() {
            diff.to_string()
        } else {
            format!("{} {}", intersection, diff)
        }
    };
    let sect_ab = combine(&diff_ab);
    let sect_ba = combine(&diff_ba);

    let mut best = ratio(&sect_ab, &sect_ba);
    if !intersection.is_empty() {
        best = best
            .max(ratio(&intersection, &sect_ab))
            .max(ratio(&intersection, &sect_ba));
    }
    best
}
