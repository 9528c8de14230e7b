use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::debug;

use crate::database::records::NewFile;
use crate::ingest::hasher::load_and_hash;
use crate::media::mimetype::{detect_mimetype, FileCategory};
use crate::utils::ids::generate_id;

/// Builds a File row from a file on disk. Nothing is written to the store here.
pub fn file_from_path(path: &Path, source_type: &str, file_id: Option<String>) -> Result<NewFile> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Path has no file name: {:?}", path))?;

    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default();

    let loaded = load_and_hash(path)?;
    let size = i64::try_from(loaded.bytes.len())
        .map_err(|_| anyhow!("File too large to record: {:?}", path))?;
    let category = FileCategory::from_extension(&extension);
    let mime_type = detect_mimetype(&loaded.bytes);

    debug!(?path, size, category = category.as_str(), mime_type, "prepared file row");

    Ok(NewFile {
        file_id: file_id.unwrap_or_else(|| generate_id("file")),
        filename: Some(filename),
        file_type: Some(extension.clone()),
        file_size: Some(size),
        source_type: Some(source_type.to_string()),
        upload_date: None,
        processed: false,
        metadata: Some(json!({
            "file_extension": extension,
            "file_size": size,
            "source_type": source_type,
            "category": category.as_str(),
            "mime_type": mime_type,
            "sha256": loaded.sha256,
        })),
        content: Some(loaded.bytes),
    })
}
