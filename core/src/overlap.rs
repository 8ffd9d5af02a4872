//! Suffix/prefix overlap detection used to trim duplicated boundaries when
//! two chunks of the same logical stream overlap (a snapshot tail repeated at
//! the head of a delta chunk, a reprinted banner, and so on).

/// Returns the largest `k <= min(|a|, |b|)` such that the last `k` bytes of
/// `a` equal the first `k` bytes of `b`, or `0` when there is no such
/// overlap.
///
/// Candidates are only considered on char boundaries of both strings so the
/// returned length is always safe to slice `b` with. The quadratic walk is
/// fine here: callers only pass bounded chunks (a few KiB at most).
pub fn overlap(a: &str, b: &str) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let max = a.len().min(b.len());
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    for k in (1..=max).rev() {
        if !b.is_char_boundary(k) || !a.is_char_boundary(a.len() - k) {
            continue;
        }
        if a_bytes[a.len() - k..] == b_bytes[..k] {
            return k;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::overlap;
    use pretty_assertions::assert_eq;

    #[test]
    fn bounded_by_shorter_input() {
        assert!(overlap("abcdef", "def") <= 3);
        assert!(overlap("ab", "abcdef") <= 2);
    }

    #[test]
    fn identical_strings_overlap_fully() {
        assert_eq!(overlap("abc", "abc"), 3);
        assert_eq!(overlap("text\n", "text\n"), 5);
    }

    #[test]
    fn disjoint_strings_do_not_overlap() {
        assert_eq!(overlap("abc", "xyz"), 0);
    }

    #[test]
    fn empty_inputs_short_circuit() {
        assert_eq!(overlap("", "abc"), 0);
        assert_eq!(overlap("abc", ""), 0);
    }

    #[test]
    fn suffix_matching_prefix_is_found() {
        assert_eq!(overlap("...text\n", "text\nnext"), "text\n".len());
    }

    #[test]
    fn picks_the_longest_candidate() {
        // "aba" overlaps "ba..." with k=2, not the shorter k=0 fallback.
        assert_eq!(overlap("aba", "bab"), 2);
        assert_eq!(overlap("aa", "aaa"), 2);
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        assert_eq!(overlap("prompt → ", "→ next"), "→ ".len());
        // No partial-char match is ever reported.
        assert_eq!(overlap("é", "\u{a9}"), 0);
    }
}
