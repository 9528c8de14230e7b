/// Broad grouping of a file by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Text,
    Documents,
    Spreadsheets,
    Presentations,
    Images,
    Audio,
    Video,
    Archives,
    Executables,
    Unknown,
}

const CATEGORIES: &[(FileCategory, &[&str])] = &[
    (FileCategory::Text, &[".txt", ".rtf"]),
    (FileCategory::Documents, &[".pdf", ".doc", ".docx"]),
    (FileCategory::Spreadsheets, &[".xlsx", ".xls", ".csv"]),
    (FileCategory::Presentations, &[".ppt", ".pptx"]),
    (FileCategory::Images, &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tif", ".tiff"]),
    (FileCategory::Audio, &[".mp3", ".wav", ".wma", ".m4a"]),
    (FileCategory::Video, &[".mp4", ".mov", ".wmv", ".flv", ".avi"]),
    (FileCategory::Archives, &[".zip", ".rar", ".7z"]),
    (FileCategory::Executables, &[".exe", ".dll", ".bat", ".sys"]),
];

impl FileCategory {
    /// `extension` includes the leading dot and is matched case-insensitively.
    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.to_ascii_lowercase();
        CATEGORIES
            .iter()
            .find(|(_, exts)| exts.contains(&extension.as_str()))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Documents => "documents",
            Self::Spreadsheets => "spreadsheets",
            Self::Presentations => "presentations",
            Self::Images => "images",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Archives => "archives",
            Self::Executables => "executables",
            Self::Unknown => "unknown",
        }
    }
}

/// Sniffs the MIME type from magic bytes.
pub fn detect_mimetype(bytes: &[u8]) -> &'static str {
    match infer::get(bytes) {
        Some(kind) => kind.mime_type(),
        None => "application/octet-stream",
    }
}
