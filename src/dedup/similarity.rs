// src/dedup/similarity.rs

/// Sørensen–Dice coefficient over character bigrams (whitespace ignored):
/// `2·|A∩B| / (|A|+|B|)`, bigrams counted as a multiset.
///
/// Blank input never matches, not even another blank.
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }
    strsim::sorensen_dice(a, b)
}
