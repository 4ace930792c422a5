//! Archive container layout and parsing.
//!
//! An archive is a zip with one dataset entry (`recipes/recipes.json`) and
//! image entries under `images/`. Anything else in the zip is ignored.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Read};

use bytes::Bytes;
use thiserror::Error;
use zip::ZipArchive;

use crate::model::{asset_base_name, file_stem, parse_dataset, Record};
use crate::transcode::CANONICAL_EXT;

pub const DATASET_ENTRY: &str = "recipes/recipes.json";
pub const ASSET_PREFIX: &str = "images/";

/// Entry sizes come from the archive itself; never trust them for more than this.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Relative image reference a record carries inside an archive, e.g.
/// `assets/images/007.jpg`.
pub fn archive_asset_ref(id: u32) -> String {
    format!("assets/images/{}.{}", asset_base_name(id), CANONICAL_EXT)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub dataset_entry: String,
    pub asset_prefix: String,
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self {
            dataset_entry: DATASET_ENTRY.to_string(),
            asset_prefix: ASSET_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CorruptArchive(pub String);

/// An image entry whose file name maps to a record id.
#[derive(Debug, Clone)]
pub struct ArchiveAsset {
    pub id: u32,
    pub file_name: String,
    pub bytes: Bytes,
}

impl ArchiveAsset {
    /// Whether the file stem is the zero-padded id, e.g. `042` for 42.
    pub fn is_canonical(&self) -> bool {
        file_stem(&self.file_name) == asset_base_name(self.id)
    }
}

#[derive(Debug)]
pub struct ArchiveContents {
    pub records: Vec<Record>,
    /// Every file name found under the asset prefix, including ones that
    /// do not map to an id.
    pub asset_names: BTreeSet<String>,
    /// Id-addressable assets, one per id, in archive order. A canonically
    /// named image wins over others for the same id; otherwise the first
    /// one does.
    pub assets: Vec<ArchiveAsset>,
}

/// Parse a downloaded archive.
///
/// Fails when the zip structure is unreadable, the dataset entry is missing,
/// repeated, or not a JSON array of records, or the dataset breaks the id invariants
/// (ids are positive and unique).
pub fn parse_archive(data: &[u8], layout: &ArchiveLayout) -> Result<ArchiveContents, CorruptArchive> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| CorruptArchive(format!("Failed to read archive: {}", e)))?;

    let start = usize::try_from(archive.central_directory_start()).unwrap_or(usize::MAX);
    let names = central_directory_names(data.get(start..).unwrap_or_default());
    if names.iter().filter(|n| **n == layout.dataset_entry.as_bytes()).count() > 1 {
        return Err(CorruptArchive(format!(
            "Archive has more than one {} entry",
            layout.dataset_entry
        )));
    }

    let mut dataset: Option<Vec<u8>> = None;
    let mut asset_names = BTreeSet::new();
    let mut assets: Vec<ArchiveAsset> = Vec::new();
    let mut asset_index: HashMap<u32, usize> = HashMap::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| CorruptArchive(format!("Failed to read archive entry {}: {}", i, e)))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        if name == layout.dataset_entry {
            let mut buf = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
            entry
                .read_to_end(&mut buf)
                .map_err(|e| CorruptArchive(format!("Failed to read {}: {}", name, e)))?;
            dataset = Some(buf);
        } else if let Some(rest) = name.strip_prefix(layout.asset_prefix.as_str()) {
            let file_name = match rest.rsplit('/').next() {
                Some(f) if !f.is_empty() => f.to_string(),
                _ => continue,
            };
            let mut buf = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
            entry
                .read_to_end(&mut buf)
                .map_err(|e| CorruptArchive(format!("Failed to read {}: {}", name, e)))?;
            asset_names.insert(file_name.clone());

            let id = match file_stem(&file_name).parse::<u32>() {
                Ok(id) if id > 0 => id,
                _ => {
                    tracing::debug!("Ignoring image without a recipe id: {}", name);
                    continue;
                }
            };
            let asset = ArchiveAsset {
                id,
                file_name,
                bytes: Bytes::from(buf),
            };
            match asset_index.get(&id).copied() {
                None => {
                    asset_index.insert(id, assets.len());
                    assets.push(asset);
                }
                Some(i) if asset.is_canonical() && !assets[i].is_canonical() => {
                    tracing::warn!(
                        "Duplicate image for recipe {}, using {} over {}",
                        id,
                        name,
                        assets[i].file_name
                    );
                    assets[i] = asset;
                }
                Some(i) => {
                    tracing::warn!(
                        "Duplicate image for recipe {}, keeping {} and ignoring {}",
                        id,
                        assets[i].file_name,
                        name
                    );
                }
            }
        }
    }

    let dataset = dataset
        .ok_or_else(|| CorruptArchive(format!("Archive has no {} entry", layout.dataset_entry)))?;
    let records = parse_dataset(&dataset)
        .map_err(|e| CorruptArchive(format!("Invalid {}: {}", layout.dataset_entry, e)))?;

    let mut ids = HashSet::with_capacity(records.len());
    for record in &records {
        if record.id == 0 {
            return Err(CorruptArchive(format!(
                "Recipe \"{}\" has invalid id 0",
                record.title
            )));
        }
        if !ids.insert(record.id) {
            return Err(CorruptArchive(format!("Duplicate recipe id {}", record.id)));
        }
    }

    tracing::debug!(
        records = records.len(),
        images = asset_names.len(),
        "Parsed archive"
    );

    Ok(ArchiveContents {
        records,
        asset_names,
        assets,
    })
}

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;

/// Raw entry names in central directory order, duplicates included. `zip`
/// keeps only one entry per name.
fn central_directory_names(dir: &[u8]) -> Vec<&[u8]> {
    let u16_at = |b: &[u8], at: usize| usize::from(u16::from_le_bytes([b[at], b[at + 1]]));
    let mut names = Vec::new();
    let mut rest = dir;
    while rest.len() >= CENTRAL_HEADER_LEN
        && u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) == CENTRAL_HEADER_SIGNATURE
    {
        let name_len = u16_at(rest, 28);
        let end = CENTRAL_HEADER_LEN + name_len + u16_at(rest, 30) + u16_at(rest, 32);
        let Some(name) = rest.get(CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len) else {
            break;
        };
        names.push(name);
        rest = rest.get(end..).unwrap_or_default();
    }
    names
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Build an in-memory zip from `(name, bytes)` entries.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_archive_asset_ref() {
        assert_eq!(archive_asset_ref(7), "assets/images/007.jpg");
        assert_eq!(archive_asset_ref(1234), "assets/images/1234.jpg");
    }

    #[test]
    fn test_parse_extracts_dataset_and_images() {
        let data = build_zip(&[
            ("recipes/recipes.json", br#"[{"id":1,"title":"Paella"}]"#),
            ("images/001.jpg", b"jpeg-bytes"),
            ("images/readme.txt", b"not an asset"),
            ("docs/other.md", b"ignored"),
        ]);
        let contents = parse_archive(&data, &ArchiveLayout::default()).unwrap();
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.records[0].title, "Paella");
        assert!(contents.asset_names.contains("001.jpg"));
        assert!(contents.asset_names.contains("readme.txt"));
        assert_eq!(contents.asset_names.len(), 2);
        assert_eq!(contents.assets.len(), 1);
        assert_eq!(contents.assets[0].id, 1);
        assert_eq!(&contents.assets[0].bytes[..], b"jpeg-bytes");
    }

    #[test]
    fn test_parse_nested_image_uses_file_name() {
        let data = build_zip(&[
            ("recipes/recipes.json", b"[]"),
            ("images/sub/012.png", b"x"),
        ]);
        let contents = parse_archive(&data, &ArchiveLayout::default()).unwrap();
        assert!(contents.asset_names.contains("012.png"));
        assert_eq!(contents.assets[0].id, 12);
    }

    #[test]
    fn test_parse_duplicate_image_keeps_first() {
        let data = build_zip(&[
            ("recipes/recipes.json", b"[]"),
            ("images/005.jpg", b"first"),
            ("images/005.png", b"second"),
        ]);
        let contents = parse_archive(&data, &ArchiveLayout::default()).unwrap();
        assert_eq!(contents.assets.len(), 1);
        assert_eq!(contents.assets[0].file_name, "005.jpg");
        assert_eq!(contents.asset_names.len(), 2);
    }

    #[test]
    fn test_parse_duplicate_image_prefers_padded_name() {
        let data = build_zip(&[
            ("recipes/recipes.json", b"[]"),
            ("images/42.png", b"unpadded"),
            ("images/042.png", b"padded"),
            ("images/0042.png", b"overpadded"),
        ]);
        let contents = parse_archive(&data, &ArchiveLayout::default()).unwrap();
        assert_eq!(contents.assets.len(), 1);
        assert_eq!(contents.assets[0].file_name, "042.png");
        assert_eq!(&contents.assets[0].bytes[..], b"padded");
        assert_eq!(contents.asset_names.len(), 3);
    }

    #[test]
    fn test_parse_padded_image_first_is_kept() {
        let data = build_zip(&[
            ("recipes/recipes.json", b"[]"),
            ("images/042.png", b"padded"),
            ("images/42.png", b"unpadded"),
        ]);
        let contents = parse_archive(&data, &ArchiveLayout::default()).unwrap();
        assert_eq!(contents.assets.len(), 1);
        assert_eq!(contents.assets[0].file_name, "042.png");
    }

    /// Zip with the dataset entry twice. `ZipWriter` refuses duplicate
    /// names, so the second entry is written under a same-length name and
    /// renamed in the raw bytes.
    fn zip_with_two_datasets(first: &[u8], second: &[u8]) -> Vec<u8> {
        let mut data = build_zip(&[
            ("recipes/recipes.json", first),
            ("recipes/recipes.jsoX", second),
        ]);
        let (from, to) = (b"recipes/recipes.jsoX", b"recipes/recipes.json");
        let mut i = 0;
        while i + from.len() <= data.len() {
            if &data[i..i + from.len()] == from {
                data[i..i + from.len()].copy_from_slice(to);
                i += from.len();
            } else {
                i += 1;
            }
        }
        data
    }

    #[test]
    fn test_parse_rejects_repeated_dataset_entry() {
        let data = zip_with_two_datasets(
            br#"[{"id":1,"title":"Soup"}]"#,
            br#"[{"id":2,"title":"Salad"}]"#,
        );
        let err = parse_archive(&data, &ArchiveLayout::default()).unwrap_err();
        assert!(err.0.contains("more than one recipes/recipes.json"), "{}", err);
    }

    #[test]
    fn test_central_directory_names_lists_every_entry() {
        let data = build_zip(&[("a.txt", b"1"), ("dir/b.txt", b"2")]);
        let archive = ZipArchive::new(Cursor::new(data.as_slice())).unwrap();
        let start = archive.central_directory_start() as usize;
        let names = central_directory_names(&data[start..]);
        assert_eq!(names, vec![&b"a.txt"[..], &b"dir/b.txt"[..]]);
        assert!(central_directory_names(b"short").is_empty());
    }

    #[test]
    fn test_parse_not_a_zip() {
        let err = parse_archive(b"<html>502 Bad Gateway</html>", &ArchiveLayout::default())
            .unwrap_err();
        assert!(err.0.contains("Failed to read archive"), "{}", err);
    }

    #[test]
    fn test_parse_missing_dataset_entry() {
        let data = build_zip(&[("images/001.jpg", b"x")]);
        let err = parse_archive(&data, &ArchiveLayout::default()).unwrap_err();
        assert!(err.0.contains("recipes/recipes.json"), "{}", err);
    }

    #[test]
    fn test_parse_malformed_json() {
        let data = build_zip(&[("recipes/recipes.json", b"{not json")]);
        assert!(parse_archive(&data, &ArchiveLayout::default()).is_err());
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let data = build_zip(&[(
            "recipes/recipes.json",
            br#"[{"id":1,"title":"a"},{"id":1,"title":"b"}]"#,
        )]);
        let err = parse_archive(&data, &ArchiveLayout::default()).unwrap_err();
        assert!(err.0.contains("Duplicate recipe id 1"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_zero_id() {
        let data = build_zip(&[("recipes/recipes.json", br#"[{"id":0,"title":"a"}]"#)]);
        assert!(parse_archive(&data, &ArchiveLayout::default()).is_err());
    }
}
