use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::catalog::{Catalog, CatalogEntry, CatalogStore};
use crate::domain::{Category, Identity};

/// Similarity at or above which a catalog name matches on its own.
pub const PRIMARY_THRESHOLD: f64 = 0.75;
/// Lower bar used when the catalog name also appears verbatim in the filename.
pub const SUBSTRING_THRESHOLD: f64 = 0.60;

const MEMO_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub identity: Option<Identity>,
    pub display_name: String,
    pub category: Category,
}

pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['_', '-', ':'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Edit-distance ratio in `[0, 1]`; symmetric, and 1.0 for equal inputs.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, a_ch) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        prev.clone_from_slice(&curr);
    }

    prev[b.len()]
}

/// Pure lookup against one catalog. Codes found verbatim win outright; otherwise
/// the best-scoring localized name wins, first entry on ties.
pub fn best_match<'a>(catalog: &'a Catalog, filename: &str) -> Option<&'a CatalogEntry> {
    let filename_norm = normalize(filename);

    if let Some(entry) = catalog
        .entries()
        .iter()
        .find(|entry| filename_norm.contains(&entry.id.as_str().to_lowercase()))
    {
        return Some(entry);
    }

    let mut best: Option<(&CatalogEntry, f64)> = None;
    for entry in catalog.entries() {
        for name in entry.names.values() {
            let name_norm = normalize(name);
            if name_norm.is_empty() {
                continue;
            }
            let score = similarity(&filename_norm, &name_norm);
            let qualifies = score >= PRIMARY_THRESHOLD
                || (filename_norm.contains(&name_norm) && score > SUBSTRING_THRESHOLD);
            if qualifies && best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((entry, score));
            }
        }
    }
    best.map(|(entry, _)| entry)
}

#[derive(Debug, Default)]
struct Memo {
    generation: u64,
    outcomes: HashMap<String, MatchOutcome>,
}

/// Filename → catalog identity resolver with a memo tied to the store's
/// generation; a locale switch or reload empties it.
#[derive(Debug)]
pub struct CatalogMatcher {
    store: Arc<CatalogStore>,
    memo: Mutex<Memo>,
}

impl CatalogMatcher {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self {
            store,
            memo: Mutex::new(Memo::default()),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn match_file(&self, filename: &str) -> MatchOutcome {
        let view = self.store.snapshot();
        {
            let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if memo.generation != view.generation {
                debug!(generation = view.generation, "catalog changed, clearing match memo");
                memo.outcomes.clear();
                memo.generation = view.generation;
            }
            if let Some(outcome) = memo.outcomes.get(filename) {
                return outcome.clone();
            }
        }

        let outcome = match best_match(&view.catalog, filename) {
            Some(entry) => MatchOutcome {
                identity: Some(entry.id.clone()),
                display_name: view.catalog.display_name(&entry.id, &view.locale),
                category: entry.id.category(),
            },
            None => MatchOutcome {
                identity: None,
                display_name: view.catalog.unknown_name(&view.locale),
                category: Category::Other,
            },
        };

        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if memo.generation == view.generation {
            if memo.outcomes.len() >= MEMO_CAPACITY {
                memo.outcomes.clear();
            }
            memo.outcomes.insert(filename.to_string(), outcome.clone());
        }
        outcome
    }

    pub fn identify(&self, filename: &str) -> Option<Identity> {
        self.match_file(filename).identity
    }

    pub fn category(&self, filename: &str) -> Category {
        self.match_file(filename).category
    }
}
