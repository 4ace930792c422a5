//! Referential check between the dataset and the archive's image entries.

use std::collections::HashSet;

use thiserror::Error;

use crate::model::{file_stem, Record};

/// A record with no matching image in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Recipe {record_id} ({title}) has no image {expected}")]
pub struct MissingAssetError {
    pub record_id: u32,
    pub title: String,
    pub expected: String,
}

/// Check that every record has an asset whose name, minus its extension,
/// equals the record's zero-padded id. Any extension is accepted.
///
/// Fails fast: the first record (in dataset order) without an asset is
/// reported and the remaining records are not examined.
pub fn validate<'a, I>(records: &[Record], asset_file_names: I) -> Result<(), MissingAssetError>
where
    I: IntoIterator<Item = &'a str>,
{
    let stems: HashSet<&str> = asset_file_names.into_iter().map(file_stem).collect();

    for record in records {
        let expected = record.asset_base_name();
        if !stems.contains(expected.as_str()) {
            return Err(MissingAssetError {
                record_id: record.id,
                title: record.title.clone(),
                expected,
            });
        }
    }
    Ok(())
}
