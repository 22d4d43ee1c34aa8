use std::collections::HashSet;

use crate::helpers::reference_words;

/// Jaccard similarity of the two names' word sets, ignoring case and punctuation. Returns 0.0 if either name has no
/// words.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = reference_words(a).into_iter().collect::<HashSet<_>>();
    let b = reference_words(b).into_iter().collect::<HashSet<_>>();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(&b).count() as f64;
    let all = a.union(&b).count() as f64;
    common / all
}
