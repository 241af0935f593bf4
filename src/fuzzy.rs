//! Approximate string similarity scored on a 0..=100 scale.

/// Normalised indel similarity: `2 * lcs / (|a| + |b|)`, as a percentage.
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best [`ratio`] of the shorter string against every window of the longer
/// one with the same length.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }
    if long.windows(short.len()).any(|window| window == short.as_slice()) {
        return 100;
    }

    let mut best = 0u8;
    for window in long.windows(short.len()) {
        best = best.max(ratio_chars(&short, window));
        if best == 100 {
            break;
        }
    }
    best
}

/// [`ratio`] of both inputs after lower-casing, splitting on anything that
/// is not alphanumeric and sorting the tokens.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut tokens: Vec<&str> = lower
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let lcs = lcs_len(a, b);
    let score = (200.0 * lcs as f64 / total as f64).round();
    score.clamp(0.0, 100.0) as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for a_ch in a {
        for (j, b_ch) in b.iter().enumerate() {
            curr[j + 1] = if a_ch == b_ch {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_bounds() {
        assert_eq!(ratio("lantern", "lantern"), 100);
        assert_eq!(ratio("abc", "xyz"), 0);
        assert_eq!(ratio("", "abc"), 0);
        // lcs("loot", "loot plus") = 4 -> 8 / 13
        assert_eq!(ratio("loot", "loot plus"), 62);
    }

    #[test]
    fn partial_ratio_finds_substrings() {
        assert_eq!(partial_ratio("loot", "moreloot_plus"), 100);
        assert_eq!(partial_ratio("moreloot_plus", "loot"), 100);
        assert_eq!(partial_ratio("", "loot"), 0);
        let near = partial_ratio("lantren", "brighter_lanterns");
        assert!(near >= 70 && near < 100, "got {near}");
    }

    #[test]
    fn token_sort_ignores_order_and_punctuation() {
        assert_eq!(token_sort_ratio("plus loot", "Loot-Plus"), 100);
        assert!(token_sort_ratio("loot", "loot-plus") > token_sort_ratio("loot", "loot-extra"));
    }
}
