//! In-process relevance: picks the page whose extracted text best contains
//! the cited passage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::engine::RenderEngine;
use crate::error::ResolutionError;
use crate::loader::FileLoader;
use crate::transport::{FileBytes, RelevanceTransport};

/// Only the head of a cited passage is compared against pages.
const QUERY_PREFIX_CHARS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct PageTextIndex {
    pages: Vec<String>,
}

impl PageTextIndex {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 1-based number of the first page with the highest partial ratio.
    pub fn find_best_match(&self, query: &str) -> u32 {
        let prefix: String = query.chars().take(QUERY_PREFIX_CHARS).collect();
        let query = prefix.trim();

        let mut best_index = 0usize;
        let mut best_score = f64::MIN;
        for (index, page) in self.pages.iter().enumerate() {
            let score = partial_ratio(page, query);
            if score > best_score {
                best_index = index;
                best_score = score;
            }
        }

        if best_index == 0 {
            warn!(query, "no relevant page found, falling back to the first page");
        } else {
            info!(query, page = best_index + 1, "found relevant page");
        }
        u32::try_from(best_index + 1).unwrap_or(u32::MAX)
    }
}

/// Similarity in `0.0..=100.0` between the shorter string and the best
/// aligned window inside the longer one. Windows are the needle's length,
/// plus the shorter head and tail windows so a passage cut off at either end
/// of the text still scores.
pub fn partial_ratio(left: &str, right: &str) -> f64 {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    let (needle, haystack) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    if needle.is_empty() {
        return 0.0;
    }

    if needle.len() > 128 {
        // Bit-parallel LCS only covers 128 needle chars.
        return best_window_ratio(needle.len(), &haystack, |window| lcs(&needle, window));
    }

    let mut masks: HashMap<char, u128> = HashMap::new();
    for (bit, ch) in needle.iter().enumerate() {
        *masks.entry(*ch).or_insert(0) |= 1u128 << bit;
    }
    let width = needle.len();
    best_window_ratio(width, &haystack, |window| {
        lcs_bit_parallel(&masks, width, window)
    })
}

/// Normalized indel similarity of the needle against every candidate window.
fn best_window_ratio(
    width: usize,
    haystack: &[char],
    lcs_with: impl Fn(&[char]) -> usize,
) -> f64 {
    let len = haystack.len();
    let heads = (1..width).map(|k| &haystack[..k]);
    let tails = (1..width).map(|k| &haystack[len - k..]);
    heads
        .chain(haystack.windows(width))
        .chain(tails)
        .map(|window| indel_ratio(lcs_with(window), width, window.len()))
        .fold(0.0, f64::max)
}

fn indel_ratio(lcs: usize, left_len: usize, right_len: usize) -> f64 {
    200.0 * lcs as f64 / (left_len + right_len) as f64
}

fn lcs_bit_parallel(masks: &HashMap<char, u128>, width: usize, text: &[char]) -> usize {
    let low_bits = if width == 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    };
    let mut state = u128::MAX;
    for ch in text {
        let matches = masks.get(ch).copied().unwrap_or(0);
        let u = state & matches;
        state = state.wrapping_add(u) | state.wrapping_sub(u);
    }
    (!state & low_bits).count_ones() as usize
}

fn lcs(left: &[char], right: &[char]) -> usize {
    let mut previous = vec![0usize; right.len() + 1];
    let mut current = vec![0usize; right.len() + 1];
    for l in left {
        for (j, r) in right.iter().enumerate() {
            current[j + 1] = if l == r {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

/// Relevance transport backed by the local loader and rendering engine.
/// Page texts are extracted once per file name.
pub struct LocalRelevance {
    loader: FileLoader,
    engine: Arc<dyn RenderEngine>,
    indexes: Mutex<HashMap<String, Arc<PageTextIndex>>>,
}

impl LocalRelevance {
    pub fn new(loader: FileLoader, engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            loader,
            engine,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    async fn index_for(&self, file_name: &str) -> Result<Arc<PageTextIndex>, ResolutionError> {
        let cached = self.indexes.lock().get(file_name).cloned();
        if let Some(index) = cached {
            return Ok(index);
        }

        let bytes = self
            .loader
            .load(file_name)
            .await
            .map_err(|err| ResolutionError::Unavailable(err.to_string()))?;
        let engine = Arc::clone(&self.engine);
        let index = tokio::task::spawn_blocking(move || extract_pages(engine.as_ref(), bytes))
            .await
            .map_err(|err| ResolutionError::Unavailable(format!("page extraction aborted: {err}")))??;

        let index = Arc::new(index);
        self.indexes
            .lock()
            .insert(file_name.to_owned(), Arc::clone(&index));
        Ok(index)
    }
}

fn extract_pages(
    engine: &dyn RenderEngine,
    bytes: FileBytes,
) -> Result<PageTextIndex, ResolutionError> {
    let document = engine
        .load(bytes)
        .map_err(|err| ResolutionError::Unavailable(err.to_string()))?;
    let pages = (1..=document.page_count())
        .map(|page| {
            document.page_text(page).unwrap_or_else(|err| {
                warn!(page, %err, "failed to extract page text");
                String::new()
            })
        })
        .collect();
    Ok(PageTextIndex::new(pages))
}

#[async_trait]
impl RelevanceTransport for LocalRelevance {
    #[instrument(skip(self, query))]
    async fn relevant_page(&self, file_name: &str, query: &str) -> Result<i64, ResolutionError> {
        let index = self.index_for(file_name).await?;
        Ok(i64::from(index.find_best_match(query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, MemoryTransport};

    #[test]
    fn partial_ratio_finds_contained_passage() {
        assert_eq!(partial_ratio("the quick brown fox", "brown"), 100.0);
        assert_eq!(partial_ratio("brown", "the quick brown fox"), 100.0);
        assert_eq!(partial_ratio("", "abc"), 0.0);
        let fuzzy = partial_ratio("revenue grew substantially in 2023", "revenue grow");
        assert!(fuzzy > 80.0 && fuzzy < 100.0, "{fuzzy}");
    }

    #[test]
    fn partial_ratio_scores_passages_cut_at_text_edges() {
        // Only "def" survives at the start of the page; the 3-char head
        // window beats every full-width window ("defxxx" scores 50).
        let head = partial_ratio("defxxxxxxxx", "abcdef");
        assert!((head - 200.0 / 3.0).abs() < 1e-9, "{head}");

        let tail = partial_ratio("xxxxxxxxabc", "abcdef");
        assert!((tail - 200.0 / 3.0).abs() < 1e-9, "{tail}");
    }

    #[test]
    fn long_needles_use_the_same_windows() {
        // 150 chars takes the table LCS path; only 130 of them reach the
        // page, right at its end.
        let passage = "ab".repeat(75);
        let page = format!("{}{}", "x".repeat(200), &passage[..130]);
        let score = partial_ratio(&page, &passage);
        let expected = 200.0 * 130.0 / 280.0;
        assert!((score - expected).abs() < 1e-9, "{score}");
    }

    #[test]
    fn bit_parallel_lcs_agrees_with_table() {
        let cases = [
            ("abcbdab", "bdcaba"),
            ("revenue", "reverence"),
            ("aaaa", "aa"),
            ("xyz", "abc"),
        ];
        for (needle, text) in cases {
            let needle: Vec<char> = needle.chars().collect();
            let text: Vec<char> = text.chars().collect();
            let mut masks: HashMap<char, u128> = HashMap::new();
            for (bit, ch) in needle.iter().enumerate() {
                *masks.entry(*ch).or_insert(0) |= 1u128 << bit;
            }
            assert_eq!(
                lcs_bit_parallel(&masks, needle.len(), &text),
                lcs(&needle, &text)
            );
        }
    }

    #[test]
    fn best_match_is_one_based_and_keeps_first_tie() {
        let index = PageTextIndex::new(vec![
            "Introduction and scope".into(),
            "Revenue grew substantially during the year".into(),
            "Revenue grew substantially during the year".into(),
        ]);
        assert_eq!(index.find_best_match("revenue grew substantially"), 2);
    }

    #[test]
    fn empty_index_falls_back_to_first_page() {
        assert_eq!(PageTextIndex::default().find_best_match("anything"), 1);
    }

    #[test]
    fn only_query_prefix_is_compared() {
        let head = "a".repeat(QUERY_PREFIX_CHARS);
        let index = PageTextIndex::new(vec![
            "zzzz".into(),
            head.clone(),
            format!("{head} tail"),
        ]);
        assert_eq!(index.find_best_match(&format!("{head} tail")), 2);
    }

    #[tokio::test]
    async fn local_relevance_extracts_pages_once() {
        let transport = Arc::new(MemoryTransport::with_file("report.pdf", b"doc"));
        let loader = FileLoader::new(transport);
        let engine = Arc::new(FakeEngine::with_pages(vec![
            "cover page",
            "methods and data",
            "the model achieves 92% accuracy",
        ]));
        let relevance = LocalRelevance::new(loader, engine.clone());

        let page = relevance
            .relevant_page("report.pdf", "The model achieves 92% accuracy.")
            .await
            .unwrap();
        assert_eq!(page, 3);
        let again = relevance
            .relevant_page("report.pdf", "methods and data")
            .await
            .unwrap();
        assert_eq!(again, 2);
        assert_eq!(engine.loads(), 1);
    }

    #[tokio::test]
    async fn local_relevance_reports_missing_files() {
        let loader = FileLoader::new(Arc::new(MemoryTransport::default()));
        let relevance = LocalRelevance::new(loader, Arc::new(FakeEngine::with_pages(vec![])));
        let err = relevance
            .relevant_page("missing.pdf", "query")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unavailable(_)));
    }
}
