//! Word dictionary with user-over-general priority.
//!
//! Files are merged in priority order into a character trie. The first file
//! that defines a term owns it; later definitions are counted as overridden.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

use crate::error::DictionaryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    User,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub term: String,
    pub weight: f64,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionarySource {
    pub path: PathBuf,
    pub origin: Origin,
}

impl DictionarySource {
    /// Assign origins to paths listed highest priority first: the last path is
    /// the general dictionary, everything before it is a user dictionary.
    pub fn from_priority_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<Self> {
        let last = paths.len().saturating_sub(1);
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| DictionarySource {
                path: p.as_ref().to_path_buf(),
                origin: if i == last { Origin::General } else { Origin::User },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub files: usize,
    pub loaded: usize,
    pub malformed: usize,
    pub overridden: usize,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, u32>,
    entry: Option<u32>,
}

/// Immutable after construction; share behind an `Arc`.
#[derive(Debug)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
    nodes: Vec<TrieNode>,
    stats: LoadStats,
}

/// Key form of a single character: NFKC when it maps to one char, then lower-cased.
pub(crate) fn fold_char(c: char) -> char {
    let mut nfkc = std::iter::once(c).nfkc();
    let folded = match (nfkc.next(), nfkc.next()) {
        (Some(n), None) => n,
        _ => c,
    };
    let mut lower = folded.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => folded,
    }
}

impl Dictionary {
    fn empty() -> Self {
        Self { entries: Vec::new(), nodes: vec![TrieNode::default()], stats: LoadStats::default() }
    }

    /// Load dictionary files ordered by priority (user dictionaries first, general last).
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, DictionaryError> {
        Self::load_sources(&DictionarySource::from_priority_paths(paths))
    }

    pub fn load_sources(sources: &[DictionarySource]) -> Result<Self, DictionaryError> {
        let mut dict = Self::empty();
        for source in sources {
            let text = std::fs::read_to_string(&source.path)
                .map_err(|e| DictionaryError::Io { path: source.path.clone(), source: e })?;
            let (parsed, malformed) = dict.merge_text(&text, source.origin);
            if parsed == 0 && malformed > 0 {
                return Err(DictionaryError::Malformed { path: source.path.clone(), malformed });
            }
            dict.stats.files += 1;
            tracing::debug!(
                path = %source.path.display(),
                origin = ?source.origin,
                parsed,
                malformed,
                "dictionary file merged"
            );
        }
        if dict.entries.is_empty() {
            return Err(DictionaryError::Empty(sources.len()));
        }
        tracing::info!(
            files = dict.stats.files,
            loaded = dict.stats.loaded,
            malformed = dict.stats.malformed,
            overridden = dict.stats.overridden,
            "dictionary loaded"
        );
        Ok(dict)
    }

    /// Build from in-memory entries, earlier entries taking priority.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = DictionaryEntry>,
    {
        let mut dict = Self::empty();
        for e in entries {
            dict.insert(e);
        }
        dict
    }

    /// Returns (parsed lines, malformed lines).
    fn merge_text(&mut self, text: &str, origin: Origin) -> (usize, usize) {
        let mut parsed = 0;
        let mut malformed = 0;
        for line in text.lines() {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((term, weight)) => {
                    parsed += 1;
                    self.insert(DictionaryEntry { term, weight, origin });
                }
                None => malformed += 1,
            }
        }
        self.stats.malformed += malformed;
        (parsed, malformed)
    }

    fn insert(&mut self, entry: DictionaryEntry) {
        let mut node = 0usize;
        for c in entry.term.chars().map(fold_char) {
            let next = match self.nodes[node].children.get(&c) {
                Some(&n) => n as usize,
                None => {
                    let n = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(c, n as u32);
                    n
                }
            };
            node = next;
        }
        if self.nodes[node].entry.is_some() {
            self.stats.overridden += 1;
            return;
        }
        self.nodes[node].entry = Some(self.entries.len() as u32);
        self.entries.push(entry);
        self.stats.loaded += 1;
    }

    /// Exact lookup of a term.
    pub fn lookup(&self, term: &str) -> Option<&DictionaryEntry> {
        let mut node = 0usize;
        for c in term.chars().map(fold_char) {
            node = *self.nodes[node].children.get(&c)? as usize;
        }
        self.nodes[node].entry.map(|i| &self.entries[i as usize])
    }

    /// Walk the trie over already folded characters and report every entry that
    /// matches a prefix, as (chars consumed, entry), shortest first.
    pub(crate) fn prefix_matches(&self, folded: &[char]) -> Vec<(usize, &DictionaryEntry)> {
        let mut out = Vec::new();
        let mut node = 0usize;
        for (i, c) in folded.iter().enumerate() {
            match self.nodes[node].children.get(c) {
                Some(&n) => node = n as usize,
                None => break,
            }
            if let Some(e) = self.nodes[node].entry {
                out.push((i + 1, &self.entries[e as usize]));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }
}

/// `term[,| ]weight[ extra...]`
fn parse_line(line: &str) -> Option<(String, f64)> {
    let mut fields = line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty());
    let term = fields.next()?.to_string();
    let weight = match fields.next() {
        None => 1.0,
        Some(w) => {
            let w: f64 = w.parse().ok()?;
            if !w.is_finite() || w < 0.0 {
                return None;
            }
            w
        }
    };
    Some((term, weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn user_dictionary_overrides_general_weight() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(dir.path(), "programming.txt", "goroutine 50\n研究生 9\n");
        let general = write(dir.path(), "dictionary.txt", "研究生 2\n研究 30\n生命 40\n");
        let dict = Dictionary::load(&[user, general]).unwrap();

        let e = dict.lookup("研究生").unwrap();
        assert_eq!(e.origin, Origin::User);
        assert_eq!(e.weight, 9.0);
        assert_eq!(dict.lookup("研究").unwrap().origin, Origin::General);
        assert_eq!(dict.stats().overridden, 1);
        assert_eq!(dict.len(), 4);
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "d.txt", "# header\n\n数据库,12\n缓存 abc\n索引\n词 -4\n");
        let dict = Dictionary::load(&[p]).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.stats().malformed, 2);
        assert_eq!(dict.lookup("索引").unwrap().weight, 1.0);
        assert_eq!(dict.lookup("数据库").unwrap().origin, Origin::General);
    }

    #[test]
    fn fully_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "bad.txt", "a x\nb -1\n");
        let result = Dictionary::load(&[p]);
        assert!(matches!(result, Err(DictionaryError::Malformed { malformed: 2, .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dictionary::load(&[dir.path().join("nope.txt")]).unwrap_err();
        assert!(matches!(err, DictionaryError::Io { .. }));
    }

    #[test]
    fn lookup_folds_width_and_case() {
        let dict = Dictionary::from_entries(vec![DictionaryEntry {
            term: "Golang".into(),
            weight: 1.0,
            origin: Origin::User,
        }]);
        assert!(dict.lookup("golang").is_some());
        assert!(dict.lookup("ＧＯＬＡＮＧ").is_some());
    }

    #[test]
    fn prefix_matches_are_shortest_first() {
        let dict = Dictionary::from_entries(vec![
            DictionaryEntry { term: "研究生".into(), weight: 1.0, origin: Origin::User },
            DictionaryEntry { term: "研究".into(), weight: 1.0, origin: Origin::General },
        ]);
        let chars: Vec<char> = "研究生命".chars().collect();
        let m: Vec<usize> = dict.prefix_matches(&chars).into_iter().map(|(n, _)| n).collect();
        assert_eq!(m, vec![2, 3]);
    }
}
