use std::sync::Arc;

use tracing::debug;

use crate::matcher::FuzzyLineMatcher;

pub const MARK_OPEN: &str = "<mark>";
pub const MARK_CLOSE: &str = "</mark>";

/// Per-fragment hook handed to the rendering engine.
#[derive(Debug, Clone)]
pub struct CitationHighlighter {
    source: String,
    matcher: FuzzyLineMatcher,
}

impl CitationHighlighter {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let matcher = FuzzyLineMatcher::new(&source);
        Self { source, matcher }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, fragment: &str) -> bool {
        self.matcher.matches(fragment)
    }

    pub fn highlight(&self, fragment: &str) -> String {
        if self.matcher.matches(fragment) {
            format!("{MARK_OPEN}{fragment}{MARK_CLOSE}")
        } else {
            fragment.to_owned()
        }
    }
}

/// Keeps the highlighter for the current excerpt and rebuilds it only when a
/// different excerpt is requested.
#[derive(Debug, Default)]
pub struct HighlighterMemo {
    current: Option<Arc<CitationHighlighter>>,
}

impl HighlighterMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, source: &str) -> Arc<CitationHighlighter> {
        if let Some(current) = &self.current {
            if current.source() == source {
                return Arc::clone(current);
            }
        }
        debug!(lines = source.split('\n').count(), "rebuilding highlight index");
        let built = Arc::new(CitationHighlighter::new(source));
        self.current = Some(Arc::clone(&built));
        built
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_matching_fragment_verbatim() {
        let highlighter =
            CitationHighlighter::new("The model achieves 92% accuracy.\nTraining took 4 hours.");
        assert_eq!(
            highlighter.highlight(" The model achieves 92% accuracy"),
            "<mark> The model achieves 92% accuracy</mark>"
        );
    }

    #[test]
    fn leaves_trivial_fragments_untouched() {
        let highlighter = CitationHighlighter::new("a\nb\nc");
        for fragment in ["", " ", "a", " b ", "\t"] {
            assert_eq!(highlighter.highlight(fragment), fragment);
        }
    }

    #[test]
    fn leaves_stopwords_untouched() {
        let highlighter = CitationHighlighter::new("revenue grew substantially");
        assert_eq!(highlighter.highlight("the"), "the");
        assert_eq!(highlighter.highlight("The"), "The");
        assert_eq!(highlighter.highlight("of "), "of ");
    }

    #[test]
    fn memo_reuses_index_for_same_excerpt() {
        let mut memo = HighlighterMemo::new();
        let first = memo.get("revenue grew");
        let second = memo.get("revenue grew");
        assert!(Arc::ptr_eq(&first, &second));

        let third = memo.get("costs fell");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.source(), "costs fell");

        memo.clear();
        let fourth = memo.get("costs fell");
        assert!(!Arc::ptr_eq(&third, &fourth));
    }
}
