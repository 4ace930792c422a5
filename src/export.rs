//! Outbound export: package the current dataset and cached images back into
//! the archive shape the sync pipeline consumes, or dump the records as JSON.

use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::{archive_asset_ref, ASSET_PREFIX, DATASET_ENTRY};
use crate::model::{asset_base_name, dataset_to_json, file_stem, Record};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to encode recipes: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No documents directory found; pass an output directory")]
    NoOutputDir,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The user's documents directory, or `~/Documents` when the platform
/// reports none.
pub fn default_output_dir() -> Option<PathBuf> {
    dirs::document_dir().or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
}

/// Write `purefood_export_{millis}.zip` into `output_dir` and return its
/// path. `progress(current, total)` is called after each entry, where
/// `total` is the dataset entry plus one per image file.
pub fn export_archive(
    records: &[Record],
    images_dir: &Path,
    output_dir: &Path,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(output_dir).map_err(io_err(output_dir))?;
    let path = output_dir.join(format!(
        "purefood_export_{}.zip",
        chrono::Utc::now().timestamp_millis()
    ));
    let file = File::create(&path).map_err(io_err(&path))?;

    let result = write_archive(BufWriter::new(file), records, images_dir, progress).and_then(
        |mut writer| writer.flush().map_err(io_err(&path)),
    );
    if let Err(e) = result {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    tracing::info!("Exported {} recipes to {}", records.len(), path.display());
    Ok(path)
}

/// Write an archive to any seekable writer and return the writer.
///
/// Record image references are rewritten to the relative archive template,
/// and cached images named by id are stored under their zero-padded name,
/// so the result can be synced back in.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    records: &[Record],
    images_dir: &Path,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<W, ExportError> {
    let images = list_images(images_dir)?;
    let total = 1 + images.len();

    let portable: Vec<Record> = records
        .iter()
        .map(|r| Record {
            asset_ref: archive_asset_ref(r.id),
            ..r.clone()
        })
        .collect();
    let json = dataset_to_json(&portable)?;

    let mut zip = ZipWriter::new(writer);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file(DATASET_ENTRY, deflated)?;
    zip.write_all(&json).map_err(io_err(Path::new(DATASET_ENTRY)))?;
    progress(1, total);

    for (i, path) in images.iter().enumerate() {
        let bytes = std::fs::read(path).map_err(io_err(path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(format!("{}{}", ASSET_PREFIX, archive_name(&name)), stored)?;
        zip.write_all(&bytes).map_err(io_err(path))?;
        progress(2 + i, total);
    }

    Ok(zip.finish()?)
}

/// Write `purefood_recipes_{millis}.json` into `output_dir`.
pub fn export_records_json(records: &[Record], output_dir: &Path) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(output_dir).map_err(io_err(output_dir))?;
    let path = output_dir.join(format!(
        "purefood_recipes_{}.json",
        chrono::Utc::now().timestamp_millis()
    ));
    let json = dataset_to_json(records)?;
    std::fs::write(&path, json).map_err(io_err(&path))?;
    tracing::info!("Exported {} recipes to {}", records.len(), path.display());
    Ok(path)
}

/// Image files in `images_dir` ordered by numeric name, non-numeric names
/// last. A missing directory has no images.
fn list_images(images_dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let entries = match std::fs::read_dir(images_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(images_dir)(e)),
    };
    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err(images_dir))?;
        if entry.file_type().map_err(io_err(images_dir))?.is_file() {
            images.push(entry.path());
        }
    }
    images.sort_by_cached_key(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let order = file_stem(&name).parse::<u64>().unwrap_or(u64::MAX);
        (order, name)
    });
    Ok(images)
}

/// `7.jpg` -> `007.jpg`; names that are not an id are kept as-is.
fn archive_name(file_name: &str) -> String {
    let stem = file_stem(file_name);
    match stem.parse::<u32>() {
        Ok(id) if id > 0 => {
            let ext = &file_name[stem.len()..];
            format!("{}{}", asset_base_name(id), ext)
        }
        _ => file_name.to_string(),
    }
}
