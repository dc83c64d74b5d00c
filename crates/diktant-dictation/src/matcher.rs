//! Word comparison.
//!
//! Typed input is compared against the target word after both pass through
//! [`normalize`]: punctuation from a fixed set is removed, the text is
//! lowercased, and surrounding whitespace is trimmed.

/// Characters ignored when comparing words.
pub const IGNORED_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '«', '»', '"', '“', '”', '(', ')', '[', ']',
];

pub fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| !IGNORED_PUNCTUATION.contains(c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

pub fn matches(typed: &str, target: &str) -> bool {
    normalize(typed) == normalize(target)
}

/// Split a line into its target words on runs of whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Key under which a word's translation is stored in a line's meanings.
pub fn meaning_key(word: &str) -> String {
    normalize(word)
}
