use chrono::NaiveDateTime;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A File row to insert. `upload_date: None` lets the column default apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFile {
    pub file_id: String,
    pub filename: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub source_type: Option<String>,
    pub upload_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing)]
    pub content: Option<Vec<u8>>,
    pub metadata: Option<Value>,
}

impl NewFile {
    pub fn new(file_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            filename: Some(filename.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub file_id: String,
    pub filename: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub source_type: Option<String>,
    pub upload_date: NaiveDateTime,
    pub processed: bool,
    #[serde(skip_serializing)]
    pub content: Option<Vec<u8>>,
    pub metadata: Option<Value>,
}

pub(crate) const FILE_COLUMNS: &str = "file_id, filename, file_type, file_size, source_type, \
     upload_date, processed, content, metadata";

impl FileRecord {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get("file_id")?,
            filename: row.get("filename")?,
            file_type: row.get("file_type")?,
            file_size: row.get("file_size")?,
            source_type: row.get("source_type")?,
            upload_date: row.get("upload_date")?,
            processed: row.get("processed")?,
            content: row.get("content")?,
            metadata: row.get("metadata")?,
        })
    }
}

/// Listing view of a File, without content or metadata.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file_id: String,
    pub filename: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub upload_date: NaiveDateTime,
    pub processed: bool,
}

impl FileSummary {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get("file_id")?,
            filename: row.get("filename")?,
            file_type: row.get("file_type")?,
            file_size: row.get("file_size")?,
            upload_date: row.get("upload_date")?,
            processed: row.get("processed")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProcessedData {
    pub data_id: String,
    pub file_id: String,
    pub content_type: Option<String>,
    pub extracted_text: Option<String>,
    pub word_count: Option<i64>,
    pub char_count: Option<i64>,
    pub file_metadata: Option<Value>,
    pub processing_date: Option<NaiveDateTime>,
    pub quality_score: Option<f64>,
}

impl NewProcessedData {
    pub fn new(data_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            data_id: data_id.into(),
            file_id: file_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDataRecord {
    pub data_id: String,
    pub file_id: String,
    pub content_type: Option<String>,
    pub extracted_text: Option<String>,
    pub word_count: Option<i64>,
    pub char_count: Option<i64>,
    pub file_metadata: Option<Value>,
    pub processing_date: NaiveDateTime,
    pub quality_score: Option<f64>,
}

pub(crate) const PROCESSED_DATA_COLUMNS: &str = "pd.data_id AS data_id, pd.file_id AS file_id, \
     pd.content_type AS content_type, pd.extracted_text AS extracted_text, \
     pd.word_count AS word_count, pd.char_count AS char_count, \
     pd.file_metadata AS file_metadata, pd.processing_date AS processing_date, \
     pd.quality_score AS quality_score";

impl ProcessedDataRecord {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            data_id: row.get("data_id")?,
            file_id: row.get("file_id")?,
            content_type: row.get("content_type")?,
            extracted_text: row.get("extracted_text")?,
            word_count: row.get("word_count")?,
            char_count: row.get("char_count")?,
            file_metadata: row.get("file_metadata")?,
            processing_date: row.get("processing_date")?,
            quality_score: row.get("quality_score")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAnalyticsResult {
    pub analysis_id: String,
    pub data_id: String,
    pub analysis_type: Option<String>,
    pub results: Option<Value>,
    pub insights: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_date: Option<NaiveDateTime>,
}

impl NewAnalyticsResult {
    pub fn new(analysis_id: impl Into<String>, data_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            data_id: data_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsResultRecord {
    pub analysis_id: String,
    pub data_id: String,
    pub analysis_type: Option<String>,
    pub results: Option<Value>,
    pub insights: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_date: NaiveDateTime,
}

pub(crate) const ANALYTICS_COLUMNS: &str = "analysis_id, data_id, analysis_type, results, \
     insights, confidence_score, created_date";

impl AnalyticsResultRecord {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            analysis_id: row.get("analysis_id")?,
            data_id: row.get("data_id")?,
            analysis_type: row.get("analysis_type")?,
            results: row.get("results")?,
            insights: row.get("insights")?,
            confidence_score: row.get("confidence_score")?,
            created_date: row.get("created_date")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewQualityMetric {
    pub metric_id: String,
    pub file_id: String,
    pub check_type: Option<String>,
    pub check_value: Option<f64>,
    pub threshold: Option<f64>,
    pub status: Option<String>,
    pub check_date: Option<NaiveDateTime>,
}

impl NewQualityMetric {
    pub fn new(metric_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            file_id: file_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetricRecord {
    pub metric_id: String,
    pub file_id: String,
    pub check_type: Option<String>,
    pub check_value: Option<f64>,
    pub threshold: Option<f64>,
    pub status: Option<String>,
    pub check_date: NaiveDateTime,
}

pub(crate) const QUALITY_METRIC_COLUMNS: &str =
    "metric_id, file_id, check_type, check_value, threshold, status, check_date";

impl QualityMetricRecord {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            metric_id: row.get("metric_id")?,
            file_id: row.get("file_id")?,
            check_type: row.get("check_type")?,
            check_value: row.get("check_value")?,
            threshold: row.get("threshold")?,
            status: row.get("status")?,
            check_date: row.get("check_date")?,
        })
    }
}

/// A File together with the ProcessedData rows derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct FileWithData {
    pub file: FileRecord,
    pub processed_data: Vec<ProcessedDataRecord>,
}
