//! Primed in-memory index cache.
//!
//! Wraps a [`FeatureIndex`] together with the id/path of the document
//! behind each row and a `primed` flag. Anything that changes persisted
//! vectors must call [`IndexCache::invalidate`]; the next query then
//! rebuilds the rows from the store through [`IndexCache::prime`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::index::{FeatureIndex, Vocabulary};
use crate::models::Document;
use crate::sparse::SparseVector;

/// The document behind one row of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub id: i64,
    pub path: PathBuf,
}

/// What [`IndexCache::prime`] loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimeReport {
    pub loaded: usize,
    /// Documents with no vector yet.
    pub missing: Vec<i64>,
    /// Documents whose stored vector could not be used, with the reason.
    pub malformed: Vec<(i64, String)>,
}

#[derive(Debug)]
pub struct IndexCache {
    index: FeatureIndex,
    entries: Vec<IndexedDocument>,
    positions: HashMap<i64, usize>,
    primed: bool,
}

impl IndexCache {
    pub fn new(index: FeatureIndex) -> Self {
        Self {
            index,
            entries: Vec::new(),
            positions: HashMap::new(),
            primed: false,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Mark the cached rows stale.
    pub fn invalidate(&mut self) {
        self.primed = false;
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut FeatureIndex {
        &mut self.index
    }

    /// Rebuild rows from persisted documents, in the order given.
    ///
    /// With a `vocabulary`, rows whose dimension does not match it are
    /// treated as stale and skipped. Without one, the index keeps its
    /// current vocabulary (possibly none) and only the rows are replaced.
    pub fn prime(&mut self, vocabulary: Option<Vocabulary>, documents: &[Document]) -> PrimeReport {
        let mut report = PrimeReport::default();
        let expected_dim = vocabulary
            .as_ref()
            .or(self.index.vocabulary())
            .map(Vocabulary::len);

        let mut rows = Vec::with_capacity(documents.len());
        self.entries.clear();
        self.positions.clear();

        for doc in documents {
            let Some(row) = doc.vector.as_ref() else {
                report.missing.push(doc.id);
                continue;
            };
            let vector = match SparseVector::from_row(row) {
                Ok(v) => v,
                Err(e) => {
                    report.malformed.push((doc.id, e.to_string()));
                    continue;
                }
            };
            if let Some(dim) = expected_dim {
                if vector.dim() != dim {
                    report.malformed.push((
                        doc.id,
                        format!("dimension {} does not match vocabulary of {}", vector.dim(), dim),
                    ));
                    continue;
                }
            }
            self.positions.insert(doc.id, self.entries.len());
            self.entries.push(IndexedDocument {
                id: doc.id,
                path: doc.path.clone(),
            });
            rows.push(vector);
        }

        report.loaded = rows.len();
        match vocabulary {
            Some(vocabulary) => self.index.load(vocabulary, rows),
            None => self.index.set_rows(rows),
        }
        self.primed = true;
        report
    }

    pub fn position_of(&self, id: i64) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn entry(&self, position: usize) -> Option<&IndexedDocument> {
        self.entries.get(position)
    }

    pub fn entries(&self) -> &[IndexedDocument] {
        &self.entries
    }

    /// Keep the cached path in step with a file the executor just moved.
    /// Rows are unaffected, so the cache stays primed.
    pub fn record_move(&mut self, id: i64, path: &Path) {
        if let Some(&pos) = self.positions.get(&id) {
            self.entries[pos].path = path.to_path_buf();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexConfig;
    use crate::sparse::SparseRow;

    fn doc(id: i64, vector: Option<SparseRow>) -> Document {
        Document {
            id,
            fingerprint: format!("fp{id}"),
            path: PathBuf::from(format!("/w/{id}.txt")),
            text_slice: String::new(),
            vector,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn fitted_rows() -> (Vocabulary, Vec<SparseRow>) {
        let mut index = FeatureIndex::new(&IndexConfig::default());
        let rows = index.fit(&["apple pie", "apple tart", "car engine"]);
        (
            index.vocabulary().unwrap().clone(),
            rows.iter().map(SparseVector::to_row).collect(),
        )
    }

    #[test]
    fn prime_loads_vectors_and_skips_missing() {
        let (vocab, rows) = fitted_rows();
        let docs = vec![
            doc(10, Some(rows[0].clone())),
            doc(11, None),
            doc(12, Some(rows[2].clone())),
        ];
        let mut cache = IndexCache::new(FeatureIndex::new(&IndexConfig::default()));
        assert!(!cache.is_primed());

        let report = cache.prime(Some(vocab), &docs);
        assert!(cache.is_primed());
        assert_eq!(report.loaded, 2);
        assert_eq!(report.missing, vec![11]);
        assert_eq!(cache.position_of(12), Some(1));
        assert_eq!(cache.position_of(11), None);
        assert!(cache.index().is_trained());
    }

    #[test]
    fn prime_rejects_rows_from_another_vocabulary() {
        let (vocab, rows) = fitted_rows();
        let stale = SparseVector::from_pairs(99, vec![(1, 1.0)]).to_row();
        let docs = vec![doc(1, Some(rows[0].clone())), doc(2, Some(stale))];
        let mut cache = IndexCache::new(FeatureIndex::new(&IndexConfig::default()));
        let report = cache.prime(Some(vocab), &docs);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].0, 2);
    }

    #[test]
    fn invalidate_clears_primed_flag_only() {
        let (vocab, rows) = fitted_rows();
        let mut cache = IndexCache::new(FeatureIndex::new(&IndexConfig::default()));
        cache.prime(Some(vocab), &[doc(1, Some(rows[0].clone()))]);
        cache.invalidate();
        assert!(!cache.is_primed());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn record_move_updates_cached_path() {
        let (vocab, rows) = fitted_rows();
        let mut cache = IndexCache::new(FeatureIndex::new(&IndexConfig::default()));
        cache.prime(Some(vocab), &[doc(5, Some(rows[1].clone()))]);
        cache.record_move(5, Path::new("/w/fruit/5.txt"));
        assert_eq!(cache.entry(0).unwrap().path, PathBuf::from("/w/fruit/5.txt"));
        assert!(cache.is_primed());
    }
}
