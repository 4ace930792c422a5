use serde::{Deserialize, Serialize};

/// One recipe in the dataset.
///
/// `id` joins the record to its image asset. The JSON wire names follow the
/// archive producer, so the asset reference is serialized as `imageUrl`.
/// Inside an archive it holds a relative template; in the synced local copy
/// it holds the absolute path of the cached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(rename = "imageUrl", default)]
    pub asset_ref: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Record {
    /// Canonical image base name for this record (see [`asset_base_name`]).
    pub fn asset_base_name(&self) -> String {
        asset_base_name(self.id)
    }

    /// Whether any category matches `category`, ignoring case.
    pub fn has_category(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.to_lowercase() == category.to_lowercase())
    }
}

/// Zero-pad an id to three digits: `7` -> `"007"`, `2569` -> `"2569"`.
pub fn asset_base_name(id: u32) -> String {
    format!("{:03}", id)
}

/// Strip the last extension from a file name. Names without a `.` are
/// returned unchanged.
pub fn file_stem(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
}

/// Decode a dataset (JSON array of records). Unknown keys are ignored.
pub fn parse_dataset(bytes: &[u8]) -> serde_json::Result<Vec<Record>> {
    serde_json::from_slice(bytes)
}

/// Encode a dataset the way it is persisted: pretty-printed JSON.
pub fn dataset_to_json(records: &[Record]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(records)
}
