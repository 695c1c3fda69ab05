//! Highlighted snippet selection for search results.
//!
//! Short texts are highlighted in place. Longer texts are scanned with a
//! bounded window anchored at each matched word: up to a fixed number of
//! context words before the anchor, then forward until the length budget is
//! exhausted. Windows are scored by distinct matched lemmas first, total
//! matched occurrences second, and the winner is wrapped in ellipses.

use crate::analyzer::{QueryLemmas, TextAnalyzer};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

pub const MAX_SNIPPET_LENGTH: usize = 200;
pub const MAX_PREFIX_WORD_COUNT: usize = 5;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"\p{L}[\p{L}']*").expect("valid regex");
}

struct Word {
    start: usize,
    end: usize,
    lemma: Option<String>,
}

pub fn build(analyzer: &TextAnalyzer, content: &str, query: &QueryLemmas) -> String {
    let matches = matched_words(analyzer, content, &query.filtered);
    if content.len() < MAX_SNIPPET_LENGTH {
        return highlight(content, &matches, &query.function_words);
    }
    let words = word_list(content, &matches);
    match best_window(content, &words) {
        Some(window) => format!(
            "...{}...",
            highlight(window, &matches, &query.function_words)
        ),
        None => {
            // No matched word in the body (e.g. the lemma only occurs in the
            // title); fall back to the leading window.
            let mut end = 0;
            for word in &words {
                if word.end > MAX_SNIPPET_LENGTH {
                    break;
                }
                end = word.end;
            }
            if end == 0 {
                end = floor_char_boundary(content, MAX_SNIPPET_LENGTH);
            }
            format!(
                "{}...",
                highlight(&content[..end], &matches, &query.function_words)
            )
        }
    }
}

/// Map from lowercase surface word to the query lemma it matches.
fn matched_words(
    analyzer: &TextAnalyzer,
    content: &str,
    filtered: &HashSet<String>,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut seen = HashSet::new();
    for mat in WORD_RE.find_iter(content) {
        let lower = mat.as_str().to_lowercase();
        if !seen.insert(lower.clone()) {
            continue;
        }
        for lemma in analyzer.word_lemmas(&lower) {
            if filtered.contains(&lemma) {
                map.insert(lower.clone(), lemma);
                break;
            }
        }
    }
    map
}

fn word_list(content: &str, matches: &HashMap<String, String>) -> Vec<Word> {
    WORD_RE
        .find_iter(content)
        .map(|mat| {
            let lower = mat.as_str().to_lowercase();
            Word {
                start: mat.start(),
                end: mat.end(),
                lemma: matches.get(&lower).cloned(),
            }
        })
        .collect()
}

fn best_window<'a>(content: &'a str, words: &[Word]) -> Option<&'a str> {
    let mut best: Option<(usize, usize)> = None;
    let mut best_distinct = 0usize;
    let mut best_total = 0usize;
    for (i, word) in words.iter().enumerate() {
        let Some(anchor_lemma) = &word.lemma else {
            continue;
        };
        if word.end - word.start > MAX_SNIPPET_LENGTH {
            continue;
        }
        let anchor_end = word.end;
        let mut begin = word.start;
        let mut distinct: HashSet<&str> = HashSet::new();
        distinct.insert(anchor_lemma);
        let mut total = 1usize;
        let mut prefix = 1usize;
        let mut j = i;
        while prefix <= MAX_PREFIX_WORD_COUNT && j > 0 {
            let prev = &words[j - 1];
            if anchor_end - prev.start > MAX_SNIPPET_LENGTH {
                break;
            }
            begin = prev.start;
            if let Some(lemma) = &prev.lemma {
                total += 1;
                distinct.insert(lemma);
            }
            prefix += 1;
            j -= 1;
        }
        let mut end = anchor_end;
        for next in &words[i + 1..] {
            if next.end - begin > MAX_SNIPPET_LENGTH {
                break;
            }
            if let Some(lemma) = &next.lemma {
                total += 1;
                distinct.insert(lemma);
            }
            end = next.end;
        }
        if distinct.len() > best_distinct || (distinct.len() == best_distinct && total > best_total)
        {
            best = Some((begin, end));
            best_distinct = distinct.len();
            best_total = total;
        }
    }
    best.map(|(begin, end)| &content[begin..end])
}

/// Wrap matched content words and exact function-word forms in emphasis
/// markers, leaving everything else untouched.
fn highlight(
    text: &str,
    matches: &HashMap<String, String>,
    function_words: &HashSet<String>,
) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut index = 0;
    for mat in WORD_RE.find_iter(text) {
        let word = mat.as_str();
        let lower = word.to_lowercase();
        if matches.contains_key(&lower) || function_words.contains(&lower) {
            out.push_str(&text[index..mat.start()]);
            out.push_str("<b>");
            out.push_str(word);
            out.push_str("</b>");
        } else {
            out.push_str(&text[index..mat.end()]);
        }
        index = mat.end();
    }
    out.push_str(&text[index..]);
    out
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_for(analyzer: &TextAnalyzer, text: &str) -> QueryLemmas {
        analyzer.query_lemma_sets(text)
    }

    #[test]
    fn short_text_is_highlighted_in_place() {
        let analyzer = TextAnalyzer::new();
        let query = query_for(&analyzer, "fox");
        let snippet = build(&analyzer, "A quick Fox jumps.", &query);
        assert_eq!(snippet, "A quick <b>Fox</b> jumps.");
    }

    #[test]
    fn long_text_gets_windowed_with_ellipses() {
        let analyzer = TextAnalyzer::new();
        let query = query_for(&analyzer, "ferret badger");
        let filler = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do ".repeat(6);
        let content = format!("{filler} the ferret met a badger near the river {filler}");
        let snippet = build(&analyzer, &content, &query);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("<b>ferret</b>"));
        assert!(snippet.contains("<b>badger</b>"));
        assert!(snippet.len() < MAX_SNIPPET_LENGTH + 100);
    }

    #[test]
    fn window_prefers_more_distinct_lemmas() {
        let analyzer = TextAnalyzer::new();
        let query = query_for(&analyzer, "ferret badger");
        let filler = "word ".repeat(60);
        // One region has only ferret, the other has both query lemmas.
        let content = format!("ferret alone here {filler} ferret and badger together {filler}");
        let snippet = build(&analyzer, &content, &query);
        assert!(snippet.contains("<b>badger</b>"));
    }

    #[test]
    fn function_words_highlighted_by_exact_form_only() {
        let analyzer = TextAnalyzer::new();
        let query = query_for(&analyzer, "the fox");
        let snippet = build(&analyzer, "See the fox run.", &query);
        assert!(snippet.contains("<b>the</b>"));
        assert!(snippet.contains("<b>fox</b>"));
        assert!(!snippet.contains("<b>See</b>"));
    }
}
