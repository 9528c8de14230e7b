use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::database::error::StoreError;
use crate::database::provision::{quote_ident, quote_literal, ProvisionPlan, ServiceCredential};
use crate::database::schema::{Dialect, TableDef, TABLES};

pub const SCHEMA_VERSION: i32 = 1;

/// A place the schema can be applied to. Every step must be idempotent.
pub trait SchemaTarget {
    fn create_database(&mut self, name: &str) -> Result<(), StoreError>;
    fn create_user(&mut self, credential: &ServiceCredential) -> Result<(), StoreError>;
    fn grant_all_on_database(
        &mut self,
        database: &str,
        credential: &ServiceCredential,
    ) -> Result<(), StoreError>;
    fn apply_table(&mut self, table: &TableDef) -> Result<(), StoreError>;
    fn finish(&mut self) -> Result<(), StoreError>;
}

/// Database, then account and grant, then tables in dependency order.
pub fn ensure_schema<T: SchemaTarget + ?Sized>(
    target: &mut T,
    plan: &ProvisionPlan,
) -> Result<(), StoreError> {
    target.create_database(plan.database())?;

    if let Some(credential) = plan.credential() {
        target.create_user(credential)?;
        target.grant_all_on_database(plan.database(), credential)?;
    }

    for table in TABLES {
        target.apply_table(table)?;
    }

    target.finish()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub created: Vec<&'static str>,
    pub existing: Vec<&'static str>,
}

pub struct SqliteTarget<'c> {
    conn: &'c Connection,
    report: SchemaReport,
}

impl<'c> SqliteTarget<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            report: SchemaReport::default(),
        }
    }

    pub fn into_report(self) -> SchemaReport {
        self.report
    }

    fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl SchemaTarget for SqliteTarget<'_> {
    fn create_database(&mut self, name: &str) -> Result<(), StoreError> {
        debug!(database = name, "sqlite file is the database; nothing to create");
        Ok(())
    }

    fn create_user(&mut self, credential: &ServiceCredential) -> Result<(), StoreError> {
        debug!(
            user = credential.user(),
            host = credential.host(),
            "sqlite has no accounts; skipping user"
        );
        Ok(())
    }

    fn grant_all_on_database(
        &mut self,
        _database: &str,
        credential: &ServiceCredential,
    ) -> Result<(), StoreError> {
        debug!(user = credential.user(), "sqlite has no grants; skipping");
        Ok(())
    }

    fn apply_table(&mut self, table: &TableDef) -> Result<(), StoreError> {
        let existed = self.table_exists(table.name)?;
        if existed {
            verify_table(self.conn, table)?;
        } else {
            self.conn.execute_batch(&table.create_sql(Dialect::Sqlite))?;
        }

        for guard in table.sqlite_guards {
            self.conn.execute_batch(guard)?;
        }

        if existed {
            debug!(table = table.name, "table already present");
            self.report.existing.push(table.name);
        } else {
            info!(table = table.name, "created table");
            self.report.created.push(table.name);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }
}

/// Applies the schema to an embedded SQLite database inside a single transaction.
pub fn ensure_sqlite_schema(conn: &mut Connection) -> Result<SchemaReport, StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    let report = {
        let mut target = SqliteTarget::new(&tx);
        ensure_schema(&mut target, &ProvisionPlan::embedded())?;
        target.into_report()
    };
    tx.commit()?;

    if report.created.is_empty() {
        debug!("schema already up to date");
    } else {
        info!(created = ?report.created, "schema applied");
    }
    Ok(report)
}

fn verify_table(conn: &Connection, table: &TableDef) -> Result<(), StoreError> {
    let conflict = |detail: String| StoreError::SchemaConflict {
        table: table.name.to_string(),
        detail,
    };

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.name))?;
    let actual = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for column in table.columns {
        let Some((_, declared, pk)) = actual.iter().find(|(name, _, _)| name == column.name)
        else {
            return Err(conflict(format!("missing column `{}`", column.name)));
        };

        let expected = column.ty.sql(Dialect::Sqlite);
        if !declared.eq_ignore_ascii_case(&expected) {
            return Err(conflict(format!(
                "column `{}` is {declared}, expected {expected}",
                column.name
            )));
        }

        let is_pk = *pk > 0;
        if is_pk != (column.name == table.primary_key) {
            return Err(conflict(format!(
                "primary key mismatch on column `{}`",
                column.name
            )));
        }
    }

    for (name, _, _) in &actual {
        if table.column(name).is_none() {
            warn!(table = table.name, column = %name, "extra column on existing table");
        }
    }

    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", table.name))?;
    let keys = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for fk in table.foreign_keys {
        let Some((_, _, to, on_delete)) = keys
            .iter()
            .find(|(parent, from, _, _)| from == fk.column && parent == fk.parent_table)
        else {
            return Err(conflict(format!(
                "missing foreign key {} -> {}",
                fk.column, fk.parent_table
            )));
        };

        if to.as_deref().is_some_and(|to| to != fk.parent_column) {
            return Err(conflict(format!(
                "foreign key {} references {}.{}, expected {}",
                fk.column,
                fk.parent_table,
                to.as_deref().unwrap_or_default(),
                fk.parent_column
            )));
        }

        // Anything other than a refusing action would drop or orphan child rows on delete.
        let refuses = on_delete.eq_ignore_ascii_case("RESTRICT")
            || on_delete.eq_ignore_ascii_case("NO ACTION");
        if !refuses {
            return Err(conflict(format!(
                "foreign key {} -> {} is ON DELETE {on_delete}, expected {}",
                fk.column,
                fk.parent_table,
                fk.on_delete.sql()
            )));
        }
        if !on_delete.eq_ignore_ascii_case(fk.on_delete.sql()) {
            debug!(
                table = table.name,
                column = fk.column,
                on_delete = %on_delete,
                "existing foreign key refuses deletes without RESTRICT"
            );
        }
    }

    Ok(())
}

/// Collects the plan as a MySQL bootstrap script for the deployment layer.
#[derive(Debug, Default)]
pub struct MySqlScript {
    statements: Vec<String>,
}

impl MySqlScript {
    pub fn render(&self) -> String {
        let mut out = String::from("-- generated by filevault; safe to apply repeatedly\n\n");
        for statement in &self.statements {
            out.push_str(statement);
            out.push_str(";\n\n");
        }
        out
    }
}

impl SchemaTarget for MySqlScript {
    fn create_database(&mut self, name: &str) -> Result<(), StoreError> {
        let name = quote_ident(name);
        self.statements
            .push(format!("CREATE DATABASE IF NOT EXISTS {name}"));
        self.statements.push(format!("USE {name}"));
        Ok(())
    }

    fn create_user(&mut self, credential: &ServiceCredential) -> Result<(), StoreError> {
        self.statements.push(format!(
            "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
            credential.account(),
            quote_literal(credential.password())
        ));
        Ok(())
    }

    fn grant_all_on_database(
        &mut self,
        database: &str,
        credential: &ServiceCredential,
    ) -> Result<(), StoreError> {
        self.statements.push(format!(
            "GRANT ALL PRIVILEGES ON {}.* TO {}",
            quote_ident(database),
            credential.account()
        ));
        self.statements.push("FLUSH PRIVILEGES".to_string());
        Ok(())
    }

    fn apply_table(&mut self, table: &TableDef) -> Result<(), StoreError> {
        self.statements.push(table.create_sql(Dialect::MySql));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn mysql_bootstrap_script(plan: &ProvisionPlan) -> Result<String, StoreError> {
    let mut script = MySqlScript::default();
    ensure_schema(&mut script, plan)?;
    Ok(script.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();

        let first = ensure_sqlite_schema(&mut conn).unwrap();
        assert_eq!(
            first.created,
            vec!["files", "processed_data", "data_quality_metrics", "analytics_results"]
        );
        assert!(first.existing.is_empty());

        let second = ensure_sqlite_schema(&mut conn).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), 4);
        assert_eq!(table_count(&conn), 4);

        let triggers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(triggers, 2);
    }

    #[test]
    fn records_schema_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_sqlite_schema(&mut conn).unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { .. }));
        assert_eq!(table_count(&conn), 0);
    }

    #[test]
    fn incompatible_existing_table_is_not_touched() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE files (file_id INTEGER PRIMARY KEY, filename TEXT);
             INSERT INTO files (file_id, filename) VALUES (7, 'keep.csv');",
        )
        .unwrap();

        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::SchemaConflict { ref table, .. } if table == "files"));

        let kept: String = conn
            .query_row("SELECT filename FROM files WHERE file_id = 7", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, "keep.csv");
        assert_eq!(table_count(&conn), 1);
    }

    #[test]
    fn missing_foreign_key_is_a_conflict() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ddl = crate::database::schema::PROCESSED_DATA.create_sql(Dialect::Sqlite);
        let cut = ddl.find(",\n    FOREIGN KEY").unwrap();
        ddl.replace_range(cut..ddl.rfind(')').unwrap(), "\n");
        conn.execute_batch(&ddl).unwrap();

        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(
            matches!(err, StoreError::SchemaConflict { ref table, ref detail } if table == "processed_data" && detail.contains("foreign key"))
        );
    }

    fn create_tables_with_delete_action(conn: &Connection, action: &str) {
        for table in TABLES {
            let ddl = table
                .create_sql(Dialect::Sqlite)
                .replace("ON DELETE RESTRICT", &format!("ON DELETE {action}"));
            conn.execute_batch(&ddl).unwrap();
        }
    }

    #[test]
    fn cascading_foreign_key_is_a_conflict() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_tables_with_delete_action(&conn, "CASCADE");
        conn.execute_batch(
            "INSERT INTO files (file_id, processed) VALUES ('f1', 0);
             INSERT INTO processed_data (data_id, file_id) VALUES ('d1', 'f1');",
        )
        .unwrap();

        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(
            matches!(err, StoreError::SchemaConflict { ref detail, .. } if detail.contains("CASCADE")),
            "got {err:?}"
        );

        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn set_null_foreign_key_is_a_conflict() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_tables_with_delete_action(&conn, "SET NULL");
        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::SchemaConflict { .. }));
    }

    #[test]
    fn no_action_foreign_key_is_accepted() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_tables_with_delete_action(&conn, "NO ACTION");
        let report = ensure_sqlite_schema(&mut conn).unwrap();
        assert_eq!(report.existing.len(), 4);
    }

    #[test]
    fn read_only_database_surfaces_privilege_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut conn = Connection::open_with_flags(
            file.path(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .unwrap();

        let err = ensure_sqlite_schema(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::Privilege(_)), "got {err:?}");
    }

    #[test]
    fn mysql_script_scopes_grant_to_one_database() {
        let plan = ProvisionPlan::new("analytics")
            .unwrap()
            .with_credential(ServiceCredential::new("svc", "%", "s3cr'et").unwrap());
        let script = mysql_bootstrap_script(&plan).unwrap();

        assert!(script.contains("CREATE DATABASE IF NOT EXISTS `analytics`;"));
        assert!(script.contains("CREATE USER IF NOT EXISTS 'svc'@'%' IDENTIFIED BY 's3cr''et';"));
        assert!(script.contains("GRANT ALL PRIVILEGES ON `analytics`.* TO 'svc'@'%';"));
        assert!(!script.contains("*.*"));

        let steps = [
            "USE `analytics`",
            "CREATE USER",
            "GRANT",
            "EXISTS files (",
            "EXISTS processed_data (",
            "EXISTS data_quality_metrics (",
            "EXISTS analytics_results (",
        ];
        let order: Vec<usize> = steps
            .iter()
            .map(|needle| script.find(needle).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn mysql_script_without_credential_has_no_accounts() {
        let script = mysql_bootstrap_script(&ProvisionPlan::new("analytics").unwrap()).unwrap();
        assert!(!script.contains("CREATE USER"));
        assert!(!script.contains("GRANT"));
        assert_eq!(script.matches("CREATE TABLE IF NOT EXISTS").count(), 4);
    }
}
