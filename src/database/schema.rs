//! Typed definitions of the four persisted tables.
//!
//! `TABLES` lists them in dependency order: every foreign key points at a
//! table that appears earlier in the list.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Varchar(u16),
    BigInt,
    Int,
    Float,
    Boolean,
    Timestamp,
    Blob,
    LongText,
    Json,
}

impl SqlType {
    pub fn sql(self, dialect: Dialect) -> String {
        match (self, dialect) {
            (Self::Varchar(len), _) => format!("VARCHAR({len})"),
            (Self::BigInt, _) => "BIGINT".to_string(),
            (Self::Int, _) => "INT".to_string(),
            (Self::Float, _) => "FLOAT".to_string(),
            (Self::Boolean, _) => "BOOLEAN".to_string(),
            (Self::Timestamp, _) => "TIMESTAMP".to_string(),
            (Self::Blob, Dialect::MySql) => "LONGBLOB".to_string(),
            (Self::Blob, Dialect::Sqlite) => "BLOB".to_string(),
            (Self::LongText, Dialect::MySql) => "LONGTEXT".to_string(),
            (Self::LongText, Dialect::Sqlite) => "TEXT".to_string(),
            (Self::Json, Dialect::MySql) => "JSON".to_string(),
            // SQLite has no JSON type; the column gets a json_valid() check instead.
            (Self::Json, Dialect::Sqlite) => "TEXT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    CurrentTimestamp,
    False,
}

impl ColumnDefault {
    fn sql(self) -> &'static str {
        match self {
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP",
            Self::False => "FALSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Restrict,
}

impl OnDelete {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: SqlType,
    pub not_null: bool,
    pub default: Option<ColumnDefault>,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKeyDef {
    pub column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub columns: &'static [ColumnDef],
    pub foreign_keys: &'static [ForeignKeyDef],
    /// SQLite triggers enforcing row invariants the engine cannot express as constraints.
    pub sqlite_guards: &'static [&'static str],
}

const fn col(name: &'static str, ty: SqlType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        not_null: false,
        default: None,
    }
}

const fn key(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty: SqlType::Varchar(255),
        not_null: true,
        default: None,
    }
}

const fn stamp(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty: SqlType::Timestamp,
        not_null: false,
        default: Some(ColumnDefault::CurrentTimestamp),
    }
}

const fn restrict(
    column: &'static str,
    parent_table: &'static str,
    parent_column: &'static str,
) -> ForeignKeyDef {
    ForeignKeyDef {
        column,
        parent_table,
        parent_column,
        on_delete: OnDelete::Restrict,
    }
}

pub const FILES: TableDef = TableDef {
    name: "files",
    primary_key: "file_id",
    columns: &[
        key("file_id"),
        col("filename", SqlType::Varchar(500)),
        col("file_type", SqlType::Varchar(50)),
        col("file_size", SqlType::BigInt),
        col("source_type", SqlType::Varchar(50)),
        stamp("upload_date"),
        ColumnDef {
            name: "processed",
            ty: SqlType::Boolean,
            not_null: true,
            default: Some(ColumnDefault::False),
        },
        col("content", SqlType::Blob),
        col("metadata", SqlType::Json),
    ],
    foreign_keys: &[],
    sqlite_guards: &[
        "CREATE TRIGGER IF NOT EXISTS files_file_id_immutable
         BEFORE UPDATE OF file_id ON files
         WHEN OLD.file_id IS NOT NEW.file_id
         BEGIN SELECT RAISE(ABORT, 'files.file_id is immutable'); END",
        "CREATE TRIGGER IF NOT EXISTS files_processed_once
         BEFORE UPDATE OF processed ON files
         WHEN OLD.processed AND NOT NEW.processed
         BEGIN SELECT RAISE(ABORT, 'files.processed cannot be reset'); END",
    ],
};

pub const PROCESSED_DATA: TableDef = TableDef {
    name: "processed_data",
    primary_key: "data_id",
    columns: &[
        key("data_id"),
        key("file_id"),
        col("content_type", SqlType::Varchar(50)),
        col("extracted_text", SqlType::LongText),
        col("word_count", SqlType::Int),
        col("char_count", SqlType::Int),
        col("file_metadata", SqlType::Json),
        stamp("processing_date"),
        col("quality_score", SqlType::Float),
    ],
    foreign_keys: &[restrict("file_id", "files", "file_id")],
    sqlite_guards: &[],
};

pub const DATA_QUALITY_METRICS: TableDef = TableDef {
    name: "data_quality_metrics",
    primary_key: "metric_id",
    columns: &[
        key("metric_id"),
        key("file_id"),
        col("check_type", SqlType::Varchar(100)),
        col("check_value", SqlType::Float),
        col("threshold", SqlType::Float),
        col("status", SqlType::Varchar(50)),
        stamp("check_date"),
    ],
    foreign_keys: &[restrict("file_id", "files", "file_id")],
    sqlite_guards: &[],
};

pub const ANALYTICS_RESULTS: TableDef = TableDef {
    name: "analytics_results",
    primary_key: "analysis_id",
    columns: &[
        key("analysis_id"),
        key("data_id"),
        col("analysis_type", SqlType::Varchar(100)),
        col("results", SqlType::Json),
        col("insights", SqlType::LongText),
        col("confidence_score", SqlType::Float),
        stamp("created_date"),
    ],
    foreign_keys: &[restrict("data_id", "processed_data", "data_id")],
    sqlite_guards: &[],
};

pub const TABLES: [&TableDef; 4] = [
    &FILES,
    &PROCESSED_DATA,
    &DATA_QUALITY_METRICS,
    &ANALYTICS_RESULTS,
];

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut lines = Vec::with_capacity(self.columns.len() + self.foreign_keys.len());

        for column in self.columns {
            let mut line = format!("    {} {}", column.name, column.ty.sql(dialect));
            if column.not_null {
                line.push_str(" NOT NULL");
            }
            if column.name == self.primary_key {
                line.push_str(" PRIMARY KEY");
            }
            if let Some(default) = column.default {
                line.push_str(" DEFAULT ");
                line.push_str(default.sql());
            }
            if column.ty == SqlType::Json && dialect == Dialect::Sqlite {
                line.push_str(&format!(
                    " CHECK ({name} IS NULL OR json_valid({name}))",
                    name = column.name
                ));
            }
            lines.push(line);
        }

        for fk in self.foreign_keys {
            lines.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {}",
                fk.column,
                fk.parent_table,
                fk.parent_column,
                fk.on_delete.sql()
            ));
        }

        let suffix = match dialect {
            Dialect::Sqlite => "",
            Dialect::MySql => " ENGINE=InnoDB",
        };

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n){}",
            self.name,
            lines.join(",\n"),
            suffix
        )
    }
}
