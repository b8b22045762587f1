//! Text normalization shared by cache keys, heuristic rules and the
//! fallback analyzer.

/// Lowercases, trims and collapses inner whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Splits normalized text into word tokens, keeping apostrophes inside words
/// ("what's") and dropping other punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '\'' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches('\'').to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// True when `phrase` occurs in `text` on word boundaries.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded_text = format!(" {} ", tokenize(text).join(" "));
    let padded_phrase = format!(" {} ", tokenize(phrase).join(" "));
    padded_text.contains(&padded_phrase)
}
