use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::dictionary::{fold_char, Dictionary, Origin};

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
            "are", "aren't", "as", "at", "be", "because", "been", "before", "being", "below",
            "between", "both", "but", "by", "can", "can't", "cannot", "could", "couldn't", "did",
            "didn't", "do", "does", "doesn't", "doing", "don't", "down", "during", "each", "few",
            "for", "from", "further", "had", "hadn't", "has", "hasn't", "have", "haven't", "having",
            "he", "he'd", "he'll", "he's", "her", "here", "here's", "hers", "herself", "him",
            "himself", "his", "how", "how's", "i", "i'd", "i'll", "i'm", "i've", "if", "in", "into",
            "is", "isn't", "it", "it's", "its", "itself", "let's", "me", "more", "most", "mustn't",
            "my", "myself", "no", "nor", "not", "of", "off", "on", "once", "only", "or", "other",
            "ought", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "she'd",
            "she'll", "she's", "should", "shouldn't", "so", "some", "such", "than", "that",
            "that's", "the", "their", "theirs", "them", "themselves", "then", "there", "there's",
            "these", "they", "they'd", "they'll", "they're", "they've", "this", "those", "through",
            "to", "too", "under", "until", "up", "very", "was", "wasn't", "we", "we'd", "we'll",
            "we're", "we've", "were", "weren't", "what", "what's", "when", "when's", "where",
            "where's", "which", "while", "who", "who's", "whom", "why", "why's", "with", "won't",
            "would", "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours",
            "yourself", "yourselves",
        ];
        words.iter().copied().collect()
    };
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Longest dictionary match.
    Dictionary(Origin),
    /// Run of ASCII letters and digits with no dictionary match.
    Word,
    /// Single character with no dictionary match.
    Fallback,
    /// Whitespace or punctuation; never a term.
    Separator,
}

/// A slice of the input. Concatenating all segments of a text yields the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    /// Byte offset into the input.
    pub offset: usize,
    pub kind: SegmentKind,
}

/// Maximum-match segmenter over a shared, immutable dictionary.
#[derive(Debug, Clone)]
pub struct Segmenter {
    dict: Arc<Dictionary>,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || (!c.is_alphanumeric() && c != '_')
}

impl Segmenter {
    pub fn new(dict: Arc<Dictionary>) -> Self {
        Self { dict }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Split `text` left to right, always taking the longest dictionary entry.
    pub fn segment<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let folded: Vec<char> = chars.iter().map(|&(_, c)| fold_char(c)).collect();
        let byte_at = |i: usize| if i < chars.len() { chars[i].0 } else { text.len() };

        let mut out = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let (len, kind) = self.step(&folded, i);
            debug_assert!(len >= 1);
            let (start, end) = (byte_at(i), byte_at(i + len));
            out.push(Segment { text: &text[start..end], offset: start, kind });
            i += len;
        }
        out
    }

    /// Length in chars and kind of the segment starting at `i`. Always at least one char.
    fn step(&self, folded: &[char], i: usize) -> (usize, SegmentKind) {
        let rest = &folded[i..];
        // A match that stops in the middle of an ASCII word is not a word boundary.
        let best = self
            .dict
            .prefix_matches(rest)
            .into_iter()
            .filter(|&(n, _)| {
                !(is_word_char(rest[n - 1]) && rest.get(n).copied().is_some_and(is_word_char))
            })
            .last();
        if let Some((n, entry)) = best {
            return (n, SegmentKind::Dictionary(entry.origin));
        }
        let c = rest[0];
        if is_word_char(c) {
            let run = rest.iter().take_while(|&&c| is_word_char(c)).count();
            return (run, SegmentKind::Word);
        }
        if is_separator(c) {
            return (1, SegmentKind::Separator);
        }
        (1, SegmentKind::Fallback)
    }

    /// Index terms as (term, position). Separators are dropped, terms are NFKC
    /// normalized and lower-cased, ASCII words are stemmed and English stopwords removed.
    pub fn terms(&self, text: &str) -> Vec<(String, usize)> {
        let mut terms = Vec::new();
        let mut pos = 0usize;
        for seg in self.segment(text) {
            if seg.kind == SegmentKind::Separator {
                continue;
            }
            let position = pos;
            pos += 1;
            let normalized = seg.text.nfkc().collect::<String>().to_lowercase();
            match seg.kind {
                SegmentKind::Word => {
                    if is_stopword(&normalized) {
                        continue;
                    }
                    terms.push((STEMMER.stem(&normalized).to_string(), position));
                }
                _ => terms.push((normalized, position)),
            }
        }
        terms
    }
}
