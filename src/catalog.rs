use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::domain::{Category, Identity};
use crate::error::PackError;

pub const DEFAULT_LOCALE: &str = "en";
const UNKNOWN_LABEL: &str = "unknown_mod";
const UNKNOWN_FALLBACK: &str = "Unknown content";

type LocalizedNames = BTreeMap<String, String>;

/// On-disk catalog document. `mods` keeps file order so that fuzzy ties
/// resolve to the first entry written.
#[derive(Debug, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub mods: Map<String, Value>,
    #[serde(default)]
    pub categories: BTreeMap<String, LocalizedNames>,
    #[serde(default)]
    pub labels: BTreeMap<String, LocalizedNames>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: Identity,
    pub names: LocalizedNames,
}

impl CatalogEntry {
    pub fn name_for(&self, locale: &str) -> Option<&str> {
        localized(&self.names, locale)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    categories: BTreeMap<String, LocalizedNames>,
    labels: BTreeMap<String, LocalizedNames>,
}

impl Catalog {
    pub fn from_json_str(content: &str) -> Result<Self, PackError> {
        let document: CatalogDocument =
            serde_json::from_str(content).map_err(|err| PackError::CatalogParse(err.to_string()))?;
        Self::from_document(document)
    }

    pub fn from_document(document: CatalogDocument) -> Result<Self, PackError> {
        let entries = document
            .mods
            .into_iter()
            .map(|(code, value)| {
                let names: LocalizedNames = serde_json::from_value(value)
                    .map_err(|err| PackError::CatalogParse(format!("{code}: {err}")))?;
                Ok(CatalogEntry {
                    id: code.parse()?,
                    names,
                })
            })
            .collect::<Result<Vec<_>, PackError>>()?;

        Ok(Self {
            entries,
            categories: document
                .categories
                .into_iter()
                .map(|(code, names)| (code.to_uppercase(), names))
                .collect(),
            labels: document.labels,
        })
    }

    pub fn read(path: &Path) -> Result<Self, PackError> {
        let content =
            fs::read_to_string(path).map_err(|_| PackError::CatalogRead(path.to_path_buf()))?;
        let catalog = Self::from_json_str(&content)?;
        info!(path = %path.display(), entries = catalog.entries.len(), "loaded catalog");
        Ok(catalog)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn find(&self, id: &Identity) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Active-locale name with `_` shown as spaces; falls back to the
    /// default locale, then to the code itself.
    pub fn display_name(&self, id: &Identity, locale: &str) -> String {
        self.find(id)
            .and_then(|entry| entry.name_for(locale))
            .map(|name| name.replace('_', " "))
            .unwrap_or_else(|| id.to_string())
    }

    pub fn category_name(&self, category: &Category, locale: &str) -> String {
        self.categories
            .get(category.as_str())
            .and_then(|names| names.get(locale))
            .cloned()
            .unwrap_or_else(|| category.to_string())
    }

    pub fn unknown_name(&self, locale: &str) -> String {
        self.labels
            .get(UNKNOWN_LABEL)
            .and_then(|names| localized(names, locale))
            .unwrap_or(UNKNOWN_FALLBACK)
            .to_string()
    }
}

fn localized<'a>(names: &'a LocalizedNames, locale: &str) -> Option<&'a str> {
    names
        .get(locale)
        .filter(|name| !name.is_empty())
        .or_else(|| names.get(DEFAULT_LOCALE).filter(|name| !name.is_empty()))
        .map(String::as_str)
}

/// Consistent view of the catalog and the locale it is projected into.
#[derive(Debug, Clone)]
pub struct CatalogView {
    pub catalog: Arc<Catalog>,
    pub locale: String,
    pub generation: u64,
}

#[derive(Debug)]
struct CatalogState {
    catalog: Arc<Catalog>,
    locale: String,
    generation: u64,
}

/// Holder of the active catalog. Reloads swap the whole catalog under one
/// write lock, so readers see either the old or the new document.
#[derive(Debug)]
pub struct CatalogStore {
    state: RwLock<CatalogState>,
}

impl CatalogStore {
    pub fn new(catalog: Catalog, locale: &str) -> Self {
        Self {
            state: RwLock::new(CatalogState {
                catalog: Arc::new(catalog),
                locale: locale.to_string(),
                generation: 0,
            }),
        }
    }

    pub fn load(path: &Path, locale: &str) -> Result<Self, PackError> {
        Ok(Self::new(Catalog::read(path)?, locale))
    }

    pub fn snapshot(&self) -> CatalogView {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        CatalogView {
            catalog: Arc::clone(&state.catalog),
            locale: state.locale.clone(),
            generation: state.generation,
        }
    }

    pub fn reload(&self, catalog: Catalog) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.catalog = Arc::new(catalog);
        state.generation += 1;
    }

    pub fn reload_from(&self, path: &Path) -> Result<(), PackError> {
        let catalog = Catalog::read(path)?;
        self.reload(catalog);
        Ok(())
    }

    /// Returns true when the locale actually changed.
    pub fn set_locale(&self, locale: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.locale == locale {
            return false;
        }
        state.locale = locale.to_string();
        state.generation += 1;
        info!(locale, "switched catalog locale");
        true
    }

    pub fn locale(&self) -> String {
        self.snapshot().locale
    }

    pub fn display_name(&self, id: &Identity) -> String {
        let view = self.snapshot();
        view.catalog.display_name(id, &view.locale)
    }

    pub fn category_name(&self, category: &Category) -> String {
        let view = self.snapshot();
        view.catalog.category_name(category, &view.locale)
    }
}
