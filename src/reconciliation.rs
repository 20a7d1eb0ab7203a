// ⚖️ Reconciliation - match input rows to existing records by natural key
//
// Every import stage does the same thing:
//   1. load existing records into a map keyed by natural key
//   2. for each row, mutate the matching record or construct a new one
//   3. save every touched record in one batch
//
// Upsert owns steps 1-2 so no key is ever touched twice in a batch.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::entities::ClassCode;

// ============================================================================
// UPSERT
// ============================================================================

pub struct Upsert<K, V> {
    existing: HashMap<K, V>,
    touched: Vec<V>,
    index: HashMap<K, usize>,
    created: usize,
}

impl<K: Eq + Hash + Clone, V> Upsert<K, V> {
    pub fn new(existing: HashMap<K, V>) -> Self {
        Upsert {
            existing,
            touched: Vec::new(),
            index: HashMap::new(),
            created: 0,
        }
    }

    /// The record for `key` in this batch: already touched, existing, or new.
    ///
    /// `create` only runs when neither the batch nor the database has the key.
    pub fn entry(&mut self, key: K, create: impl FnOnce() -> V) -> &mut V {
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let record = match self.existing.remove(&key) {
                    Some(record) => record,
                    None => {
                        self.created += 1;
                        create()
                    }
                };
                self.touched.push(record);
                self.index.insert(key, self.touched.len() - 1);
                self.touched.len() - 1
            }
        };

        &mut self.touched[position]
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Records constructed in this batch (not found in the database)
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn len(&self) -> usize {
        self.touched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Touched records in first-touch order, ready for a batch save
    pub fn into_records(self) -> Vec<V> {
        self.touched
    }
}

// ============================================================================
// CLASS CODES
// ============================================================================

/// Resolves Census class codes, tolerating unknown ones.
///
/// An unknown code leaves the place unclassified and is logged the first
/// time it is seen; repeats stay silent for the rest of the run.
pub struct ClassCodeResolver {
    codes: HashMap<String, ClassCode>,
    unknown: HashSet<String>,
}

impl ClassCodeResolver {
    pub fn new(codes: HashMap<String, ClassCode>) -> Self {
        ClassCodeResolver {
            codes,
            unknown: HashSet::new(),
        }
    }

    pub fn resolve(&mut self, code: &str) -> Option<i64> {
        if let Some(class_code) = self.codes.get(code) {
            return Some(class_code.id);
        }

        if self.unknown.insert(code.to_string()) {
            tracing::warn!("Unknown class code: {}", code);
        }
        None
    }

    /// Distinct unknown codes seen so far
    pub fn unknown_codes(&self) -> Vec<String> {
        let mut codes: Vec<_> = self.unknown.iter().cloned().collect();
        codes.sort();
        codes
    }
}
