//! Symmetric fuzzy-match scoring between normalized plate strings

use crate::infra::config::SimilarityMetric;

/// Longest common block inside `a[alo..ahi]` x `b[blo..bhi]`.
///
/// Ties resolve to the earliest start in `a`, then the earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0);
    // prev[j] = length of the common suffix ending at a[i-1], b[j-1]
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    let mut curr = vec![0usize; width];
    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            curr[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            if curr[k] > best_len {
                best_len = curr[k];
                best_i = i + 1 - best_len;
                best_j = j + 1 - best_len;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
        curr.iter_mut().for_each(|v| *v = 0);
    }
    (best_i, best_j, best_len)
}

/// Total characters covered by Ratcliff/Obershelp matching blocks
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut stack = vec![((0, a.len()), (0, b.len()))];
    while let Some(((alo, ahi), (blo, bhi))) = stack.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, len) = longest_match(a, b, (alo, ahi), (blo, bhi));
        if len == 0 {
            continue;
        }
        total += len;
        stack.push(((alo, i), (blo, j)));
        stack.push(((i + len, ahi), (j + len, bhi)));
    }
    total
}

/// `2*M / T` in one argument order
fn directed_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(a, b) as f64 / total as f64
}

/// Matching-block ratio, symmetrized by taking the better argument order
pub fn matching_block_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    directed_ratio(&a, &b).max(directed_ratio(&b, &a))
}

/// Scores two normalized strings in `[0, 1]`; `score(a, a) == 1`
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    metric: SimilarityMetric,
}

impl SimilarityScorer {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    #[inline]
    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self.metric {
            SimilarityMetric::MatchingBlocks => matching_block_ratio(a, b),
            SimilarityMetric::Levenshtein => strsim::normalized_levenshtein(a, b),
        }
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(SimilarityMetric::MatchingBlocks)
    }
}
