//! Textual similarity of market descriptions.
//!
//! Ratcliff/Obershelp ratio: `2 × matched / (len_a + len_b)` where `matched`
//! counts characters in the longest common block, recursively on both sides
//! of it. 1.0 means identical, 0.0 means nothing in common.

/// Similarity of two descriptions after lower-casing and trimming.
pub fn description_similarity(a: &str, b: &str) -> f64 {
    sequence_ratio(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }
        matched += size;
        if a_lo < i && b_lo < j {
            pending.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            pending.push((i + size, a_hi, j + size, b_hi));
        }
    }
    matched
}

/// Longest common block of `a[a_lo..a_hi]` and `b[b_lo..b_hi]`, earliest first.
fn longest_match(
    a: &[char],
    b: &[char],
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let width = b_hi - b_lo;
    let mut best = (a_lo, b_lo, 0);
    let mut previous = vec![0usize; width + 1];
    let mut current = vec![0usize; width + 1];

    for i in a_lo..a_hi {
        for j in b_lo..b_hi {
            let col = j - b_lo + 1;
            current[col] = if a[i] == b[j] { previous[col - 1] + 1 } else { 0 };
            let size = current[col];
            if size > best.2 {
                best = (i + 1 - size, j + 1 - size, size);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_disjoint() {
        assert_eq!(sequence_ratio("abcd", "abcd"), 1.0);
        assert_eq!(sequence_ratio("abc", "xyz"), 0.0);
        assert_eq!(sequence_ratio("", ""), 1.0);
    }

    #[test]
    fn test_known_ratios() {
        // 2 * 3 / 8
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        // matches "a", "b", "d"
        assert!((sequence_ratio("abxd", "abyd") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_descriptions_case_insensitive() {
        let score = description_similarity(
            "  Will the Fed cut rates in March?",
            "will the fed cut rates in march?",
        );
        assert_eq!(score, 1.0);

        let close = description_similarity(
            "Will the Fed cut rates in March 2025?",
            "Will the Fed cut rates in March, 2025?",
        );
        assert!(close > 0.9);

        let unrelated = description_similarity(
            "Will the Fed cut rates in March?",
            "Who wins the Super Bowl?",
        );
        assert!(unrelated < 0.8);
    }
}
