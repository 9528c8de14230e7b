use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use crate::database::error::{is_foreign_key_violation, is_key_conflict, StoreError};
use crate::database::migrate::{ensure_sqlite_schema, SchemaReport};
use crate::database::records::{
    AnalyticsResultRecord, FileRecord, FileSummary, FileWithData, NewAnalyticsResult, NewFile,
    NewProcessedData, NewQualityMetric, ProcessedDataRecord, QualityMetricRecord,
    ANALYTICS_COLUMNS, FILE_COLUMNS, PROCESSED_DATA_COLUMNS, QUALITY_METRIC_COLUMNS,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Store {
    conn: Connection,
    schema: SchemaReport,
}

impl Store {
    /// Opens the database file and makes sure the schema is in place.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::classify)?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let schema = ensure_sqlite_schema(&mut conn)?;
        Ok(Self { conn, schema })
    }

    /// What the schema step did when this store was opened.
    pub fn schema_report(&self) -> &SchemaReport {
        &self.schema
    }

    pub fn insert_file(&mut self, file: &NewFile) -> Result<(), StoreError> {
        write_file(&self.conn, file)
    }

    pub fn insert_processed_data(&mut self, data: &NewProcessedData) -> Result<(), StoreError> {
        write_processed_data(&self.conn, data)
    }

    pub fn insert_analytics_result(
        &mut self,
        result: &NewAnalyticsResult,
    ) -> Result<(), StoreError> {
        write_analytics_result(&self.conn, result)
    }

    pub fn insert_quality_metric(&mut self, metric: &NewQualityMetric) -> Result<(), StoreError> {
        write_quality_metric(&self.conn, metric)
    }

    /// Inserts files in one transaction: all rows land or none do.
    pub fn insert_files(&mut self, files: &[NewFile]) -> Result<usize, StoreError> {
        self.insert_batch("files", files, write_file)
    }

    pub fn insert_processed_data_batch(
        &mut self,
        rows: &[NewProcessedData],
    ) -> Result<usize, StoreError> {
        self.insert_batch("processed_data", rows, write_processed_data)
    }

    pub fn insert_analytics_results(
        &mut self,
        results: &[NewAnalyticsResult],
    ) -> Result<usize, StoreError> {
        self.insert_batch("analytics_results", results, write_analytics_result)
    }

    /// Inserts a batch of checks in one transaction: all rows land or none do.
    pub fn insert_quality_metrics(
        &mut self,
        metrics: &[NewQualityMetric],
    ) -> Result<usize, StoreError> {
        self.insert_batch("data_quality_metrics", metrics, write_quality_metric)
    }

    /// Dropping the transaction on the first error rolls the earlier rows back.
    fn insert_batch<T>(
        &mut self,
        table: &'static str,
        rows: &[T],
        write: fn(&Connection, &T) -> Result<(), StoreError>,
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for row in rows {
            write(&tx, row)?;
        }
        tx.commit()?;

        info!(table, count = rows.len(), "batch inserted");
        Ok(rows.len())
    }

    pub fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE file_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [file_id], FileRecord::from_row)
            .optional()?)
    }

    pub fn get_processed_data(
        &self,
        data_id: &str,
    ) -> Result<Option<ProcessedDataRecord>, StoreError> {
        let sql = format!("SELECT {PROCESSED_DATA_COLUMNS} FROM processed_data pd WHERE pd.data_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [data_id], ProcessedDataRecord::from_row)
            .optional()?)
    }

    pub fn get_analytics_result(
        &self,
        analysis_id: &str,
    ) -> Result<Option<AnalyticsResultRecord>, StoreError> {
        let sql = format!("SELECT {ANALYTICS_COLUMNS} FROM analytics_results WHERE analysis_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [analysis_id], AnalyticsResultRecord::from_row)
            .optional()?)
    }

    /// The File and its ProcessedData rows, joined on `file_id`.
    pub fn file_with_data(&self, file_id: &str) -> Result<Option<FileWithData>, StoreError> {
        let Some(file) = self.get_file(file_id)? else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {PROCESSED_DATA_COLUMNS}
             FROM processed_data pd
             JOIN files f ON f.file_id = pd.file_id
             WHERE f.file_id = ?1
             ORDER BY pd.processing_date, pd.data_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let processed_data = stmt
            .query_map([file_id], ProcessedDataRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(FileWithData {
            file,
            processed_data,
        }))
    }

    pub fn analytics_for_data(
        &self,
        data_id: &str,
    ) -> Result<Vec<AnalyticsResultRecord>, StoreError> {
        let sql = format!(
            "SELECT {ANALYTICS_COLUMNS} FROM analytics_results
             WHERE data_id = ?1
             ORDER BY created_date, analysis_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([data_id], AnalyticsResultRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn quality_metrics_for_file(
        &self,
        file_id: &str,
    ) -> Result<Vec<QualityMetricRecord>, StoreError> {
        let sql = format!(
            "SELECT {QUALITY_METRIC_COLUMNS} FROM data_quality_metrics
             WHERE file_id = ?1
             ORDER BY check_date, metric_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([file_id], QualityMetricRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `processed: None` lists every file.
    pub fn list_files(&self, processed: Option<bool>) -> Result<Vec<FileSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, filename, file_type, file_size, upload_date, processed
             FROM files
             WHERE ?1 IS NULL OR processed = ?1
             ORDER BY upload_date, file_id",
        )?;
        let rows = stmt
            .query_map([processed], FileSummary::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flips `processed` from false to true. It happens once per file.
    pub fn mark_processed(&mut self, file_id: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE files SET processed = TRUE WHERE file_id = ?1 AND NOT processed",
            [file_id],
        )?;
        if changed == 1 {
            info!(file_id, "file marked processed");
            return Ok(());
        }

        if self.exists("files", "file_id", file_id)? {
            Err(StoreError::AlreadyProcessed(file_id.to_string()))
        } else {
            Err(StoreError::NotFound {
                table: "files",
                key: file_id.to_string(),
            })
        }
    }

    pub fn delete_file(&mut self, file_id: &str) -> Result<(), StoreError> {
        self.delete_row("files", "file_id", file_id)
    }

    pub fn delete_processed_data(&mut self, data_id: &str) -> Result<(), StoreError> {
        self.delete_row("processed_data", "data_id", data_id)
    }

    /// Foreign keys are RESTRICT, so a parent with dependents is refused, never cascaded.
    fn delete_row(
        &mut self,
        table: &'static str,
        key_column: &'static str,
        key: &str,
    ) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {table} WHERE {key_column} = ?1");
        let removed = self.conn.execute(&sql, [key]).map_err(|err| {
            if is_foreign_key_violation(&err) {
                StoreError::HasDependents {
                    table,
                    key: key.to_string(),
                }
            } else {
                StoreError::classify(err)
            }
        })?;

        if removed == 0 {
            return Err(StoreError::NotFound {
                table,
                key: key.to_string(),
            });
        }
        info!(table, key, "row deleted");
        Ok(())
    }

    fn exists(&self, table: &str, key_column: &str, key: &str) -> Result<bool, StoreError> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {key_column} = ?1)");
        Ok(self.conn.query_row(&sql, [key], |row| row.get(0))?)
    }
}

fn write_file(conn: &Connection, file: &NewFile) -> Result<(), StoreError> {
    require_id("file_id", &file.file_id)?;
    conn.prepare_cached(
        "INSERT INTO files
         (file_id, filename, file_type, file_size, source_type, upload_date, processed, content, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, CURRENT_TIMESTAMP), ?7, ?8, ?9)",
    )?
    .execute(params![
        file.file_id,
        file.filename,
        file.file_type,
        file.file_size,
        file.source_type,
        file.upload_date,
        file.processed,
        file.content,
        json_text(&file.metadata),
    ])
    .map_err(|err| insert_error(err, "files", &file.file_id, None))?;
    debug!(file_id = %file.file_id, "file inserted");
    Ok(())
}

fn write_processed_data(conn: &Connection, data: &NewProcessedData) -> Result<(), StoreError> {
    require_id("data_id", &data.data_id)?;
    conn.prepare_cached(
        "INSERT INTO processed_data
         (data_id, file_id, content_type, extracted_text, word_count, char_count,
          file_metadata, processing_date, quality_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, COALESCE(?8, CURRENT_TIMESTAMP), ?9)",
    )?
    .execute(params![
        data.data_id,
        data.file_id,
        data.content_type,
        data.extracted_text,
        data.word_count,
        data.char_count,
        json_text(&data.file_metadata),
        data.processing_date,
        data.quality_score,
    ])
    .map_err(|err| {
        insert_error(err, "processed_data", &data.data_id, Some(("files", &data.file_id)))
    })?;
    debug!(data_id = %data.data_id, file_id = %data.file_id, "processed data inserted");
    Ok(())
}

fn write_analytics_result(conn: &Connection, result: &NewAnalyticsResult) -> Result<(), StoreError> {
    require_id("analysis_id", &result.analysis_id)?;
    conn.prepare_cached(
        "INSERT INTO analytics_results
         (analysis_id, data_id, analysis_type, results, insights, confidence_score, created_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, CURRENT_TIMESTAMP))",
    )?
    .execute(params![
        result.analysis_id,
        result.data_id,
        result.analysis_type,
        json_text(&result.results),
        result.insights,
        result.confidence_score,
        result.created_date,
    ])
    .map_err(|err| {
        insert_error(
            err,
            "analytics_results",
            &result.analysis_id,
            Some(("processed_data", &result.data_id)),
        )
    })?;
    debug!(analysis_id = %result.analysis_id, data_id = %result.data_id, "analytics result inserted");
    Ok(())
}

fn write_quality_metric(conn: &Connection, metric: &NewQualityMetric) -> Result<(), StoreError> {
    require_id("metric_id", &metric.metric_id)?;
    conn.prepare_cached(
        "INSERT INTO data_quality_metrics
         (metric_id, file_id, check_type, check_value, threshold, status, check_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, CURRENT_TIMESTAMP))",
    )?
    .execute(params![
        metric.metric_id,
        metric.file_id,
        metric.check_type,
        metric.check_value,
        metric.threshold,
        metric.status,
        metric.check_date,
    ])
    .map_err(|err| {
        insert_error(
            err,
            "data_quality_metrics",
            &metric.metric_id,
            Some(("files", &metric.file_id)),
        )
    })?;
    debug!(metric_id = %metric.metric_id, file_id = %metric.file_id, "quality metric inserted");
    Ok(())
}

fn require_id(column: &'static str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::InvalidIdentifier {
            kind: column,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn json_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(Value::to_string)
}

fn insert_error(
    err: rusqlite::Error,
    table: &'static str,
    key: &str,
    parent: Option<(&'static str, &str)>,
) -> StoreError {
    if is_key_conflict(&err) {
        return StoreError::Duplicate {
            table,
            key: key.to_string(),
        };
    }
    match parent {
        Some((parent, parent_key)) if is_foreign_key_violation(&err) => StoreError::MissingParent {
            table,
            parent,
            key: parent_key.to_string(),
        },
        _ => StoreError::classify(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seeded() -> Store {
        let mut store = store();
        store.insert_file(&NewFile::new("f1", "a.csv")).unwrap();
        store
    }

    fn assert_near_now(stamp: chrono::NaiveDateTime) {
        let now = Utc::now().naive_utc();
        let drift = (now - stamp).num_seconds().abs();
        assert!(drift <= 5, "timestamp {stamp} is {drift}s away from {now}");
    }

    #[test]
    fn concrete_scenario_with_restricted_delete() {
        let mut store = seeded();

        let mut data = NewProcessedData::new("d1", "f1");
        data.word_count = Some(120);
        store.insert_processed_data(&data).unwrap();

        let joined = store.file_with_data("f1").unwrap().unwrap();
        assert_eq!(joined.file.filename.as_deref(), Some("a.csv"));
        assert_eq!(joined.processed_data.len(), 1);
        assert_eq!(joined.processed_data[0].data_id, "d1");
        assert_eq!(joined.processed_data[0].word_count, Some(120));

        let mut analysis = NewAnalyticsResult::new("a1", "d1");
        analysis.confidence_score = Some(0.9);
        store.insert_analytics_result(&analysis).unwrap();
        let stored = store.get_analytics_result("a1").unwrap().unwrap();
        assert!((stored.confidence_score.unwrap() - 0.9).abs() < 1e-9);

        let err = store.delete_file("f1").unwrap_err();
        assert!(matches!(err, StoreError::HasDependents { table: "files", .. }));
        assert!(store.get_file("f1").unwrap().is_some());

        let err = store.delete_processed_data("d1").unwrap_err();
        assert!(matches!(err, StoreError::HasDependents { table: "processed_data", .. }));
    }

    #[test]
    fn processed_data_requires_existing_file() {
        let mut store = store();
        let err = store
            .insert_processed_data(&NewProcessedData::new("d1", "nope"))
            .unwrap_err();
        assert!(
            matches!(err, StoreError::MissingParent { parent: "files", ref key, .. } if key == "nope")
        );
        assert!(err.is_validation());
        assert!(store.get_processed_data("d1").unwrap().is_none());
    }

    #[test]
    fn analytics_result_requires_existing_processed_data() {
        let mut store = seeded();
        let err = store
            .insert_analytics_result(&NewAnalyticsResult::new("a1", "missing"))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { parent: "processed_data", .. }));
    }

    #[test]
    fn quality_metric_requires_existing_file() {
        let mut store = store();
        let err = store
            .insert_quality_metric(&NewQualityMetric::new("m1", "ghost"))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { table: "data_quality_metrics", .. }));
    }

    #[test]
    fn timestamps_default_to_insertion_time() {
        let mut store = seeded();
        store
            .insert_processed_data(&NewProcessedData::new("d1", "f1"))
            .unwrap();
        store
            .insert_analytics_result(&NewAnalyticsResult::new("a1", "d1"))
            .unwrap();
        store
            .insert_quality_metric(&NewQualityMetric::new("m1", "f1"))
            .unwrap();

        assert_near_now(store.get_file("f1").unwrap().unwrap().upload_date);
        assert_near_now(store.get_processed_data("d1").unwrap().unwrap().processing_date);
        assert_near_now(store.get_analytics_result("a1").unwrap().unwrap().created_date);
        assert_near_now(store.quality_metrics_for_file("f1").unwrap()[0].check_date);
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let mut store = store();
        let stamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let mut file = NewFile::new("f1", "a.csv");
        file.upload_date = Some(stamp);
        store.insert_file(&file).unwrap();
        assert_eq!(store.get_file("f1").unwrap().unwrap().upload_date, stamp);
    }

    #[test]
    fn processed_defaults_false_and_explicit_true_is_kept() {
        let mut store = seeded();
        let mut done = NewFile::new("f2", "b.csv");
        done.processed = true;
        store.insert_file(&done).unwrap();

        assert!(!store.get_file("f1").unwrap().unwrap().processed);
        assert!(store.get_file("f2").unwrap().unwrap().processed);

        let pending = store.list_files(Some(false)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_id, "f1");
        assert_eq!(store.list_files(None).unwrap().len(), 2);
    }

    #[test]
    fn mark_processed_happens_exactly_once() {
        let mut store = seeded();
        store.mark_processed("f1").unwrap();
        assert!(store.get_file("f1").unwrap().unwrap().processed);

        let err = store.mark_processed("f1").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyProcessed(ref id) if id == "f1"));

        let err = store.mark_processed("zz").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { table: "files", .. }));
    }

    #[test]
    fn guards_block_reset_and_rekey() {
        let mut store = seeded();
        store.mark_processed("f1").unwrap();

        let err = store
            .conn
            .execute("UPDATE files SET processed = FALSE WHERE file_id = 'f1'", [])
            .map_err(StoreError::classify)
            .unwrap_err();
        assert!(matches!(err, StoreError::Guard(ref msg) if msg.contains("processed")));

        let err = store
            .conn
            .execute("UPDATE files SET file_id = 'f9' WHERE file_id = 'f1'", [])
            .map_err(StoreError::classify)
            .unwrap_err();
        assert!(matches!(err, StoreError::Guard(ref msg) if msg.contains("immutable")));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut store = seeded();
        let err = store.insert_file(&NewFile::new("f1", "again.csv")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { table: "files", .. }));

        let err = store.insert_file(&NewFile::new("  ", "blank.csv")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier { kind: "file_id", .. }));
    }

    #[test]
    fn json_columns_round_trip_and_content_is_stored() {
        let mut store = store();
        let mut file = NewFile::new("f1", "a.csv");
        file.content = Some(b"col\n1\n".to_vec());
        file.metadata = Some(json!({"file_extension": ".csv", "tags": ["x"]}));
        store.insert_file(&file).unwrap();

        let stored = store.get_file("f1").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some(&b"col\n1\n"[..]));
        assert_eq!(stored.metadata, file.metadata);
    }

    #[test]
    fn metric_batch_is_all_or_nothing() {
        let mut store = seeded();
        let mut ok = NewQualityMetric::new("m1", "f1");
        ok.check_type = Some("completeness".into());
        ok.check_value = Some(0.9);
        ok.threshold = Some(0.5);
        ok.status = Some("good".into());

        let err = store
            .insert_quality_metrics(&[ok.clone(), NewQualityMetric::new("m2", "ghost")])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { .. }));
        assert!(store.quality_metrics_for_file("f1").unwrap().is_empty());

        let mut second = NewQualityMetric::new("m2", "f1");
        second.check_type = Some("validity".into());
        assert_eq!(store.insert_quality_metrics(&[ok, second]).unwrap(), 2);

        let stored = store.quality_metrics_for_file("f1").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].status.as_deref(), Some("good"));
    }

    #[test]
    fn file_batch_with_duplicate_leaves_no_rows() {
        let mut store = store();
        let batch = [
            NewFile::new("f1", "a.csv"),
            NewFile::new("f2", "b.csv"),
            NewFile::new("f1", "again.csv"),
        ];
        let err = store.insert_files(&batch).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { table: "files", .. }));
        assert!(store.list_files(None).unwrap().is_empty());

        assert_eq!(store.insert_files(&batch[..2]).unwrap(), 2);
        assert_eq!(store.list_files(None).unwrap().len(), 2);
    }

    #[test]
    fn processed_and_analytics_batches_roll_back_together() {
        let mut store = seeded();
        let err = store
            .insert_processed_data_batch(&[
                NewProcessedData::new("d1", "f1"),
                NewProcessedData::new("d2", "ghost"),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { parent: "files", .. }));
        assert!(store.get_processed_data("d1").unwrap().is_none());

        store
            .insert_processed_data_batch(&[NewProcessedData::new("d1", "f1")])
            .unwrap();
        let err = store
            .insert_analytics_results(&[
                NewAnalyticsResult::new("a1", "d1"),
                NewAnalyticsResult::new("a2", "missing"),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { parent: "processed_data", .. }));
        assert!(store.analytics_for_data("d1").unwrap().is_empty());
    }

    #[test]
    fn delete_without_dependents_succeeds() {
        let mut store = seeded();
        store.delete_file("f1").unwrap();
        assert!(store.get_file("f1").unwrap().is_none());
        assert!(matches!(
            store.delete_file("f1").unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn reopening_a_file_store_keeps_rows_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        let mut first = Store::open(&path).unwrap();
        assert_eq!(first.schema_report().created.len(), 4);
        first.insert_file(&NewFile::new("f1", "a.csv")).unwrap();
        drop(first);

        let second = Store::open(&path).unwrap();
        assert!(second.schema_report().created.is_empty());
        assert!(second.get_file("f1").unwrap().is_some());
    }

    #[test]
    fn unreachable_path_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Store::open(&dir.path().join("missing/sub/vault.db")).err().unwrap();
        assert!(matches!(err, StoreError::Connection(_)), "got {err:?}");
    }
}
