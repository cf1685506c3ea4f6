//! TF-IDF feature index.
//!
//! [`FeatureIndex`] owns a fitted vocabulary and the row matrix of the
//! corpus it was fitted on. Weighting follows the usual smoothed scheme:
//!
//! ```text
//! idf(t)   = ln((1 + n) / (1 + df(t))) + 1
//! w(t, d)  = tf(t, d) * idf(t)        then each row is L2-normalized
//! ```
//!
//! Vocabulary size is capped at `max_features`, keeping the terms with
//! the highest corpus-wide counts. The kept terms are indexed in
//! lexicographic order so a refit over the same corpus is stable.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::sparse::SparseVector;
use crate::tokenize::{Analyzer, DefaultTokenizer, StopwordSet, Tokenizer};

/// Similarity at or above this is treated as the query matching itself.
pub const SELF_MATCH_TOLERANCE: f32 = 0.9999;

/// Label returned when a group has no usable keywords.
pub const NO_KEYWORDS_LABEL: &str = "untitled";

pub const DEFAULT_MAX_FEATURES: usize = 5000;

/// Fitted terms with their inverse document frequencies, index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub terms: Vec<String>,
    pub idf: Vec<f32>,
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub max_features: usize,
    pub stopwords: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
            stopwords: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct FeatureIndex {
    max_features: usize,
    analyzer: Analyzer,
    vocabulary: Option<Vocabulary>,
    lookup: HashMap<String, u32>,
    rows: Vec<SparseVector>,
}

impl FeatureIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self::with_tokenizer(config, Arc::new(DefaultTokenizer))
    }

    pub fn with_tokenizer(config: &IndexConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            max_features: config.max_features.max(1),
            analyzer: Analyzer::new(tokenizer, StopwordSet::new(&config.stopwords)),
            vocabulary: None,
            lookup: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Replace the custom stopwords. The analyzer is rebuilt; the current
    /// vocabulary stays until the next [`fit`](Self::fit).
    pub fn update_stopwords(&mut self, custom: &[String]) {
        self.analyzer = self.analyzer.rebuild(StopwordSet::new(custom));
    }

    pub fn stopwords(&self) -> &StopwordSet {
        self.analyzer.stopwords()
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.vocabulary.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.vocabulary.is_some()
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&SparseVector> {
        self.rows.get(i)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Learn a vocabulary from `texts` and return one normalized row per
    /// text, in input order. The rows also become the index matrix.
    ///
    /// An empty input leaves the index untouched and returns no rows.
    pub fn fit<S: AsRef<str>>(&mut self, texts: &[S]) -> Vec<SparseVector> {
        if texts.is_empty() {
            return Vec::new();
        }

        let docs: Vec<Vec<String>> = texts
            .iter()
            .map(|t| self.analyzer.analyze(t.as_ref()))
            .collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for tokens in &docs {
            let mut seen: Vec<&str> = Vec::with_capacity(tokens.len());
            for t in tokens {
                *counts.entry(t.as_str()).or_default() += 1;
                seen.push(t.as_str());
            }
            seen.sort_unstable();
            seen.dedup();
            for t in seen {
                *doc_freq.entry(t).or_default() += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features);
        let mut terms: Vec<&str> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort_unstable();

        let n = docs.len() as f32;
        let idf: Vec<f32> = terms
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f32;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        let vocabulary = Vocabulary {
            terms: terms.iter().map(|t| t.to_string()).collect(),
            idf,
        };
        self.install_vocabulary(vocabulary);

        let rows: Vec<SparseVector> = docs.iter().map(|tokens| self.weigh(tokens)).collect();
        self.rows = rows.clone();
        rows
    }

    /// Project `text` onto the fitted vocabulary.
    pub fn transform(&self, text: &str) -> Result<SparseVector, IndexError> {
        if self.vocabulary.is_none() {
            return Err(IndexError::NotTrained);
        }
        Ok(self.weigh(&self.analyzer.analyze(text)))
    }

    /// Restore a previously fitted vocabulary and its rows.
    pub fn load(&mut self, vocabulary: Vocabulary, rows: Vec<SparseVector>) {
        self.install_vocabulary(vocabulary);
        self.rows = rows;
    }

    /// Replace the row matrix, keeping the current vocabulary (if any).
    pub fn set_rows(&mut self, rows: Vec<SparseVector>) {
        self.rows = rows;
    }

    /// Top `n` rows by cosine similarity to `query`, best first.
    ///
    /// Rows scoring at or above [`SELF_MATCH_TOLERANCE`] are dropped as
    /// self-matches. At most `min(n, rows - 1)` results are returned.
    pub fn find_top_n_similar(&self, query: &SparseVector, n: usize) -> (Vec<usize>, Vec<f32>) {
        let sims: Vec<f32> = self.rows.iter().map(|r| query.cosine(r)).collect();
        self.select_top(&sims, n, None)
    }

    /// Like [`find_top_n_similar`](Self::find_top_n_similar) for a row of
    /// the index itself; that row is never part of the result, even when
    /// it is all zeros.
    pub fn find_top_n_similar_to_row(
        &self,
        row: usize,
        n: usize,
    ) -> Result<(Vec<usize>, Vec<f32>), IndexError> {
        let query = self.rows.get(row).ok_or(IndexError::RowOutOfRange {
            row,
            rows: self.rows.len(),
        })?;
        let sims: Vec<f32> = self.rows.iter().map(|r| query.cosine(r)).collect();
        Ok(self.select_top(&sims, n, Some(row)))
    }

    /// Highest-weighted terms over the summed rows of `doc_indices`,
    /// joined with `_`.
    ///
    /// Terms shorter than two characters or without any letter are not
    /// used as labels. Returns [`NO_KEYWORDS_LABEL`] when nothing is left.
    pub fn get_top_keywords(&self, doc_indices: &[usize], n: usize) -> Result<String, IndexError> {
        let vocabulary = self.vocabulary.as_ref().ok_or(IndexError::NotTrained)?;

        let mut acc = vec![0.0f32; vocabulary.len()];
        for &i in doc_indices {
            let row = self.rows.get(i).ok_or(IndexError::RowOutOfRange {
                row: i,
                rows: self.rows.len(),
            })?;
            row.accumulate_into(&mut acc);
        }

        let mut ranked: Vec<usize> = (0..acc.len())
            .filter(|&t| acc[t] > 0.0 && is_label_term(&vocabulary.terms[t]))
            .collect();
        ranked.sort_by(|&a, &b| {
            acc[b]
                .total_cmp(&acc[a])
                .then_with(|| vocabulary.terms[a].cmp(&vocabulary.terms[b]))
        });
        ranked.truncate(n);

        if ranked.is_empty() {
            return Ok(NO_KEYWORDS_LABEL.to_string());
        }
        let words: Vec<&str> = ranked
            .iter()
            .map(|&t| vocabulary.terms[t].as_str())
            .collect();
        Ok(words.join("_"))
    }

    fn install_vocabulary(&mut self, vocabulary: Vocabulary) {
        self.lookup = vocabulary
            .terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        self.vocabulary = Some(vocabulary);
    }

    fn weigh(&self, tokens: &[String]) -> SparseVector {
        let Some(vocabulary) = self.vocabulary.as_ref() else {
            return SparseVector::default();
        };
        let pairs: Vec<(u32, f32)> = tokens
            .iter()
            .filter_map(|t| self.lookup.get(t.as_str()).copied())
            .map(|i| (i, vocabulary.idf[i as usize]))
            .collect();
        let mut row = SparseVector::from_pairs(vocabulary.len(), pairs);
        row.normalize();
        row
    }

    fn select_top(&self, sims: &[f32], n: usize, exclude: Option<usize>) -> (Vec<usize>, Vec<f32>) {
        let limit = n.min(self.rows.len().saturating_sub(1));
        if limit == 0 {
            return (Vec::new(), Vec::new());
        }

        let mut candidates: Vec<usize> = (0..sims.len()).filter(|&i| Some(i) != exclude).collect();
        let want = (n + 1).min(candidates.len());
        if want == 0 {
            return (Vec::new(), Vec::new());
        }
        if want < candidates.len() {
            candidates.select_nth_unstable_by(want - 1, |&a, &b| sims[b].total_cmp(&sims[a]));
            candidates.truncate(want);
        }

        candidates.retain(|&i| sims[i] < SELF_MATCH_TOLERANCE);
        candidates.sort_by(|&a, &b| sims[b].total_cmp(&sims[a]).then(a.cmp(&b)));
        candidates.truncate(limit);

        let scores = candidates.iter().map(|&i| sims[i]).collect();
        (candidates, scores)
    }
}

fn is_label_term(term: &str) -> bool {
    term.chars().count() >= 2 && term.chars().any(char::is_alphabetic)
}
