use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    /// Tokens are restricted to the target alphabet after lowercasing.
    static ref TOKEN_RE: Regex = Regex::new(r"[a-z][a-z']*").expect("valid regex");
    /// Script/style bodies carry no natural-language content.
    static ref NON_CONTENT_RE: Regex =
        Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)\s*>")
            .expect("valid regex");
    static ref FUNCTION_WORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves",
        ];
        words.iter().copied().collect()
    };
}

/// Query lemmas split into content words and function words. Function-word
/// lemmas never participate in ranking or filtering; they are kept only so
/// snippets can highlight their exact surface forms.
#[derive(Debug, Default)]
pub struct QueryLemmas {
    pub filtered: HashSet<String>,
    pub function_words: HashSet<String>,
}

/// Morphological analyzer: raw HTML in, lemma occurrence counts out.
///
/// Immutable once constructed; safe to share behind an `Arc` between any
/// number of crawl workers and search calls.
pub struct TextAnalyzer {
    stemmer: Stemmer,
}

impl TextAnalyzer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Strip markup down to whitespace-normalized plain text.
    pub fn plain_text(&self, html: &str) -> String {
        let cleaned = NON_CONTENT_RE.replace_all(html, " ");
        let doc = Html::parse_document(&cleaned);
        let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// The page `<title>`, or an empty string when absent.
    pub fn title(&self, html: &str) -> String {
        let selector = Selector::parse("title").expect("valid selector");
        let doc = Html::parse_document(html);
        doc.select(&selector)
            .next()
            .map(|node| node.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    /// Lemma occurrence counts for a raw HTML document.
    pub fn lemmas(&self, html: &str) -> HashMap<String, u32> {
        self.text_lemmas(&self.plain_text(html))
    }

    /// Lemma occurrence counts for already-plain text: NFKC normalization,
    /// lowercasing, alphabet filter, function-word removal, then one count
    /// per first normal form.
    pub fn text_lemmas(&self, text: &str) -> HashMap<String, u32> {
        let normalized = normalize(text);
        let mut counts = HashMap::new();
        for mat in TOKEN_RE.find_iter(&normalized) {
            let token = mat.as_str();
            if is_function_word(token) {
                continue;
            }
            let lemma = self.stemmer.stem(token).to_string();
            *counts.entry(lemma).or_insert(0) += 1;
        }
        counts
    }

    /// Partition a query into content-word lemmas and function words.
    pub fn query_lemma_sets(&self, text: &str) -> QueryLemmas {
        let normalized = normalize(text);
        let mut sets = QueryLemmas::default();
        for mat in TOKEN_RE.find_iter(&normalized) {
            let token = mat.as_str();
            if is_function_word(token) {
                sets.function_words.insert(token.to_string());
            } else {
                sets.filtered.insert(self.stemmer.stem(token).to_string());
            }
        }
        sets
    }

    /// Normal forms of a single surface word; empty for function words and
    /// for anything outside the target alphabet.
    pub fn word_lemmas(&self, word: &str) -> Vec<String> {
        let normalized = normalize(word);
        let Some(mat) = TOKEN_RE.find(&normalized) else {
            return Vec::new();
        };
        if mat.start() != 0 || mat.end() != normalized.len() {
            return Vec::new();
        }
        let token = mat.as_str();
        if is_function_word(token) {
            return Vec::new();
        }
        vec![self.stemmer.stem(token).to_string()]
    }
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

pub fn is_function_word(token: &str) -> bool {
    FUNCTION_WORDS.contains(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_normal_form() {
        let analyzer = TextAnalyzer::new();
        let counts = analyzer.text_lemmas("Running runners run. Run!");
        assert_eq!(counts.get("run"), Some(&3));
        assert_eq!(counts.get("runner"), Some(&1));
    }

    #[test]
    fn drops_function_words() {
        let analyzer = TextAnalyzer::new();
        let counts = analyzer.text_lemmas("the quick brown fox and the lazy dog");
        assert!(!counts.contains_key("the"));
        assert!(!counts.contains_key("and"));
        assert!(counts.contains_key("fox"));
    }

    #[test]
    fn strips_markup_and_scripts() {
        let analyzer = TextAnalyzer::new();
        let html = "<html><head><title>Hello</title><script>var x = 'leak';</script></head>\
                    <body><p>visible words</p><style>.a{color:red}</style></body></html>";
        let text = analyzer.plain_text(html);
        assert!(text.contains("visible words"));
        assert!(!text.contains("leak"));
        assert!(!text.contains("color"));
        assert_eq!(analyzer.title(html), "Hello");
    }

    #[test]
    fn query_sets_are_partitioned() {
        let analyzer = TextAnalyzer::new();
        let sets = analyzer.query_lemma_sets("the running foxes");
        assert!(sets.function_words.contains("the"));
        assert!(sets.filtered.contains("run"));
        assert!(sets.filtered.contains("fox"));
        assert!(!sets.filtered.contains("the"));
    }

    #[test]
    fn word_lemmas_empty_for_function_words() {
        let analyzer = TextAnalyzer::new();
        assert!(analyzer.word_lemmas("the").is_empty());
        assert_eq!(analyzer.word_lemmas("Foxes"), vec!["fox".to_string()]);
        assert!(analyzer.word_lemmas("123").is_empty());
    }
}
