//! Approximate membership of rendered text fragments in a cited excerpt.
//!
//! Every excerpt line is a reference target. A fragment matches a line when
//! either its whole-line edit distance is small relative to the line, or some
//! chunk of it aligns inside the line with few errors near the position the
//! chunk occupies in the fragment (Bitap-style scoring: error ratio plus a
//! location penalty).

use crate::stopwords::is_stopword;

/// 0.0 demands an exact match, 1.0 accepts anything.
pub const SIMILARITY_THRESHOLD: f64 = 0.4;

/// Longest pattern chunk aligned in one pass, as in 32-bit Bitap.
const MAX_CHUNK_CHARS: usize = 32;
/// Characters of drift from the expected location that cost a full mismatch.
const LOCATION_DISTANCE: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct FuzzyLineMatcher {
    lines: Vec<Vec<char>>,
    threshold: f64,
}

impl FuzzyLineMatcher {
    pub fn new(excerpt: &str) -> Self {
        let lines = excerpt.split('\n').map(|line| fold(line.trim())).collect();
        Self {
            lines,
            threshold: SIMILARITY_THRESHOLD,
        }
    }

    /// Number of reference lines, empty ones included.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn matches(&self, fragment: &str) -> bool {
        let trimmed = fragment.trim();
        if trimmed.chars().count() <= 1 {
            return false;
        }
        let folded = trimmed.to_lowercase();
        if is_stopword(&folded) {
            return false;
        }
        let pattern: Vec<char> = folded.chars().collect();
        self.lines
            .iter()
            .any(|line| line_score(&pattern, line) <= self.threshold)
    }
}

fn fold(text: &str) -> Vec<char> {
    text.to_lowercase().chars().collect()
}

/// Best (lowest) score of `pattern` against one reference line.
fn line_score(pattern: &[char], line: &[char]) -> f64 {
    if line.is_empty() {
        return 1.0;
    }
    if pattern == line {
        return 0.0;
    }

    let whole = levenshtein(pattern, line) as f64 / line.len() as f64;
    chunks(pattern)
        .into_iter()
        .map(|(offset, chunk)| align(chunk, line, offset))
        .fold(whole, f64::min)
}

fn chunks(pattern: &[char]) -> Vec<(usize, &[char])> {
    let len = pattern.len();
    if len <= MAX_CHUNK_CHARS {
        return vec![(0, pattern)];
    }

    let remainder = len % MAX_CHUNK_CHARS;
    let mut out: Vec<(usize, &[char])> = (0..len - remainder)
        .step_by(MAX_CHUNK_CHARS)
        .map(|start| (start, &pattern[start..start + MAX_CHUNK_CHARS]))
        .collect();
    if remainder > 0 {
        let start = len - MAX_CHUNK_CHARS;
        out.push((start, &pattern[start..]));
    }
    out
}

/// Aligns `chunk` anywhere inside `text` (free leading and trailing text) and
/// scores the best alignment as `errors / chunk_len + drift / distance`.
fn align(chunk: &[char], text: &[char], expected_start: usize) -> f64 {
    let m = chunk.len();
    if m == 0 {
        return 1.0;
    }

    let score = |errors: usize, start: usize| {
        errors as f64 / m as f64 + start.abs_diff(expected_start) as f64 / LOCATION_DISTANCE
    };

    // cost[i]: edits to align chunk[..i] ending at the current text position,
    // start[i]: text index where that alignment begins.
    let mut cost: Vec<usize> = (0..=m).collect();
    let mut start: Vec<usize> = vec![0; m + 1];
    let mut best = score(cost[m], start[m]);

    for (j, &ch) in text.iter().enumerate() {
        let mut diag_cost = cost[0];
        let mut diag_start = start[0];
        cost[0] = 0;
        start[0] = j + 1;

        for i in 1..=m {
            let above_cost = cost[i];
            let above_start = start[i];

            let mut next_cost = diag_cost + usize::from(chunk[i - 1] != ch);
            let mut next_start = diag_start;
            if cost[i - 1] + 1 < next_cost {
                next_cost = cost[i - 1] + 1;
                next_start = start[i - 1];
            }
            if above_cost + 1 < next_cost {
                next_cost = above_cost + 1;
                next_start = above_start;
            }

            cost[i] = next_cost;
            start[i] = next_start;
            diag_cost = above_cost;
            diag_start = above_start;
        }

        best = best.min(score(cost[m], start[m]));
    }

    best
}

fn levenshtein(left: &[char], right: &[char]) -> usize {
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous_row: Vec<usize> = (0..=right.len()).collect();
    let mut current_row = vec![0usize; right.len() + 1];

    for (left_index, left_char) in left.iter().enumerate() {
        current_row[0] = left_index + 1;
        for (right_index, right_char) in right.iter().enumerate() {
            let substitution = previous_row[right_index] + usize::from(left_char != right_char);
            let deletion = previous_row[right_index + 1] + 1;
            let insertion = current_row[right_index] + 1;
            current_row[right_index + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous_row, &mut current_row);
    }

    previous_row[right.len()]
}
