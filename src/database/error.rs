use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to database: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("insufficient privilege: {0}")]
    Privilege(#[source] rusqlite::Error),

    #[error("existing table `{table}` is incompatible: {detail}")]
    SchemaConflict { table: String, detail: String },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    #[error("{table} row references missing {parent} `{key}`")]
    MissingParent {
        table: &'static str,
        parent: &'static str,
        key: String,
    },

    #[error("{table} `{key}` already exists")]
    Duplicate { table: &'static str, key: String },

    #[error("{table} `{key}` still has dependent rows")]
    HasDependents { table: &'static str, key: String },

    #[error("{table} `{key}` not found")]
    NotFound { table: &'static str, key: String },

    #[error("file `{0}` is already marked processed")]
    AlreadyProcessed(String),

    #[error("invalid {kind} `{value}`")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("rejected by guard: {0}")]
    Guard(String),

    #[error("sqlite: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StoreError {
    /// Sorts a raw engine failure into connection, privilege or generic buckets.
    pub fn classify(err: rusqlite::Error) -> Self {
        match sqlite_code(&err) {
            Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => Self::Connection(err),
            Some(
                ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
                | ErrorCode::AuthorizationForStatementDenied,
            ) => Self::Privilege(err),
            _ => {
                if extended_code(&err) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER) {
                    let message = match &err {
                        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
                        _ => err.to_string(),
                    };
                    return Self::Guard(message);
                }
                Self::Sqlite(err)
            }
        }
    }

    /// Referential-integrity failures are caller validation errors and are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingParent { .. }
                | Self::Duplicate { .. }
                | Self::HasDependents { .. }
                | Self::NotFound { .. }
                | Self::AlreadyProcessed(_)
                | Self::InvalidIdentifier { .. }
                | Self::InvalidInput(_)
                | Self::Guard(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::classify(value)
    }
}

fn sqlite_code(err: &rusqlite::Error) -> Option<ErrorCode> {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => Some(code.code),
        _ => None,
    }
}

pub(crate) fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => Some(code.extended_code),
        _ => None,
    }
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    extended_code(err) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

pub(crate) fn is_key_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        extended_code(err),
        Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}
