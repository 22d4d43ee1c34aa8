/// Uppercases the text and drops everything that is not a letter or a digit.
///
/// `"order ab-12 cd"` becomes `"ORDERAB12CD"`.
pub fn normalize_reference(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).flat_map(|c| c.to_uppercase()).collect()
}

/// Splits the text into uppercase alphanumeric words.
pub fn reference_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(|w| w.to_uppercase()).collect()
}

/// `"000123"` becomes `"123"`. An all-zero string stays `"0"`.
pub fn strip_leading_zeros(s: &str) -> &str {
    let stripped = s.trim_start_matches('0');
    if stripped.is_empty() && !s.is_empty() {
        "0"
    } else {
        stripped
    }
}
