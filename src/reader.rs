//! Read-only access to the dataset for the rest of the application.
//!
//! Resolution order, first hit wins: the synced dataset in the Local Store,
//! then the dataset bundled into the binary, then nothing. Reading never
//! fails; a missing or malformed source is skipped and recorded in the
//! [`LoadOutcome`].

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::model::{parse_dataset, Record};
use crate::store::LocalStore;

/// Dataset compiled into the binary, used until the first sync completes.
pub const BUNDLED_DATASET: &str = include_str!("../assets/default_recipes.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSource {
    Local,
    Bundled,
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Local => f.write_str("local"),
            DatasetSource::Bundled => f.write_str("bundled"),
        }
    }
}

/// Why a source was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub source: DatasetSource,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded {
        records: Vec<Record>,
        source: DatasetSource,
    },
    /// Every source was skipped.
    Empty(Vec<Skipped>),
}

impl LoadOutcome {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            LoadOutcome::Loaded { records, .. } => records,
            LoadOutcome::Empty(_) => Vec::new(),
        }
    }

    pub fn source(&self) -> Option<DatasetSource> {
        match self {
            LoadOutcome::Loaded { source, .. } => Some(*source),
            LoadOutcome::Empty(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetReader {
    store: Arc<dyn LocalStore>,
    bundled: Option<Cow<'static, str>>,
}

impl DatasetReader {
    /// Reader falling back to [`BUNDLED_DATASET`].
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            bundled: Some(Cow::Borrowed(BUNDLED_DATASET)),
        }
    }

    pub fn with_bundled(store: Arc<dyn LocalStore>, json: impl Into<Cow<'static, str>>) -> Self {
        Self {
            store,
            bundled: Some(json.into()),
        }
    }

    pub fn without_bundled(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            bundled: None,
        }
    }

    pub fn load(&self) -> LoadOutcome {
        let mut skipped = Vec::new();

        let path = self.store.dataset_path();
        match std::fs::read(&path) {
            Ok(bytes) => match parse_dataset(&bytes) {
                Ok(records) => {
                    return LoadOutcome::Loaded {
                        records,
                        source: DatasetSource::Local,
                    }
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed dataset {}: {}", path.display(), e);
                    skipped.push(Skipped {
                        source: DatasetSource::Local,
                        reason: format!("malformed JSON: {}", e),
                    });
                }
            },
            Err(e) => {
                tracing::debug!("No local dataset at {}: {}", path.display(), e);
                skipped.push(Skipped {
                    source: DatasetSource::Local,
                    reason: e.to_string(),
                });
            }
        }

        match self.bundled.as_deref() {
            Some(json) => match parse_dataset(json.as_bytes()) {
                Ok(records) => {
                    return LoadOutcome::Loaded {
                        records,
                        source: DatasetSource::Bundled,
                    }
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed bundled dataset: {}", e);
                    skipped.push(Skipped {
                        source: DatasetSource::Bundled,
                        reason: format!("malformed JSON: {}", e),
                    });
                }
            },
            None => skipped.push(Skipped {
                source: DatasetSource::Bundled,
                reason: "no bundled dataset".to_string(),
            }),
        }

        LoadOutcome::Empty(skipped)
    }

    /// Best-effort record list; empty when no source is usable.
    pub fn load_records(&self) -> Vec<Record> {
        self.load().into_records()
    }

    pub fn record_by_id(&self, id: u32) -> Option<Record> {
        self.load_records().into_iter().find(|r| r.id == id)
    }

    /// Records in `category`, ignoring case.
    pub fn records_by_category(&self, category: &str) -> Vec<Record> {
        self.load_records()
            .into_iter()
            .filter(|r| r.has_category(category))
            .collect()
    }

    /// Distinct category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.load_records()
            .into_iter()
            .flat_map(|r| r.categories)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Records whose title contains `query`, ignoring case. An empty query
    /// matches everything.
    pub fn search_title(&self, query: &str) -> Vec<Record> {
        let query = query.trim().to_lowercase();
        let records = self.load_records();
        if query.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|r| r.title.to_lowercase().contains(&query))
            .collect()
    }
}
