use std::collections::HashSet;

use once_cell::sync::Lazy;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "on", "in", "a", "an", "the", "is", "at", "it", "of", "to", "and", "we",
    ]
    .into_iter()
    .collect()
});

/// Case-insensitive membership in the closed set of function words that are
/// never worth highlighting on their own.
pub fn is_stopword(token: &str) -> bool {
    if token.chars().any(char::is_uppercase) {
        STOPWORDS.contains(token.to_lowercase().as_str())
    } else {
        STOPWORDS.contains(token)
    }
}
