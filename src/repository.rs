//! Generic SQLite repository driven by [`Record`] field descriptors.
//!
//! Every operation opens its own connection and releases it before
//! returning; only [`Repository::insert_many`] groups statements in a
//! transaction. Engine errors are returned unchanged as
//! [`LoaderError::Database`].

use std::{
    fmt,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use rusqlite::{Connection, OpenFlags};

use crate::{
    record::{ColumnKind, FieldDef, Record},
    LoaderError, Params, Result, Row, Value,
};

/// Upper bound on bound parameters per statement in the bundled SQLite.
const MAX_BIND_PARAMETERS: usize = 32_766;

/// Location of the SQLite database file.
#[derive(Clone, Debug)]
pub struct Database {
    path: Arc<PathBuf>,
}

impl Database {
    /// Creates missing parent directories and the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self {
            path: Arc::new(path),
        };
        db.connect()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh connection. Callers drop it when the operation ends.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            self.path.as_path(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(conn)
    }
}

/// CRUD access to one table whose rows are records of type `T`.
pub struct Repository<T> {
    db: Database,
    table: String,
    identity: usize,
    auto_increment: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("db", &self.db.path())
            .field("table", &self.table)
            .field("identity", &self.identity)
            .field("auto_increment", &self.auto_increment)
            .finish()
    }
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            table: self.table.clone(),
            identity: self.identity,
            auto_increment: self.auto_increment,
            _record: PhantomData,
        }
    }
}

impl<T: Record> Repository<T> {
    pub const DEFAULT_IDENTITY: &'static str = "id";

    /// Repository keyed by the `id` field, auto-incremented when it is an
    /// integer.
    pub fn new(db: Database, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let identity = Self::identity_index(&table, Self::DEFAULT_IDENTITY)?;
        let auto_increment = T::fields()[identity].kind == ColumnKind::Integer;
        Ok(Self {
            db,
            table,
            identity,
            auto_increment,
            _record: PhantomData,
        })
    }

    /// Repository keyed by `column`. `auto_increment` requires an integer
    /// identity.
    pub fn with_identity(
        db: Database,
        table: impl Into<String>,
        column: &str,
        auto_increment: bool,
    ) -> Result<Self> {
        let table = table.into();
        let identity = Self::identity_index(&table, column)?;
        if auto_increment && T::fields()[identity].kind != ColumnKind::Integer {
            return Err(LoaderError::Schema(format!(
                "identity '{column}' of table '{table}' must be an integer to auto-increment"
            )));
        }
        Ok(Self {
            db,
            table,
            identity,
            auto_increment,
            _record: PhantomData,
        })
    }

    fn identity_index(table: &str, column: &str) -> Result<usize> {
        T::fields()
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                LoaderError::Schema(format!(
                    "record for table '{table}' has no identity field '{column}'"
                ))
            })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity_field(&self) -> &'static FieldDef {
        &T::fields()[self.identity]
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn table_exists(&self) -> Result<bool> {
        let conn = self.db.connect()?;
        let count = scalar(
            &conn,
            "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &Params::positional([Value::text(self.table.as_str())]),
        )?;
        Ok(count > 0)
    }

    /// Creates the table unless it exists. Returns whether it was created.
    ///
    /// `ddl` replaces the DDL inferred from the record's fields.
    pub fn create_table(&self, ddl: Option<&str>) -> Result<bool> {
        if self.table_exists()? {
            return Ok(false);
        }
        let conn = self.db.connect()?;
        match ddl.filter(|ddl| !ddl.trim().is_empty()) {
            Some(ddl) => conn.execute_batch(ddl)?,
            None => conn.execute_batch(&self.create_table_sql())?,
        }
        tracing::debug!(table = %self.table, "created table");
        Ok(true)
    }

    /// DDL inferred from the record's fields.
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = T::fields()
            .iter()
            .enumerate()
            .map(|(index, field)| {
                let mut column = format!("{} {}", quote_ident(field.name), field.kind.sql_type());
                if index == self.identity {
                    column.push_str(" PRIMARY KEY");
                    if self.auto_increment {
                        column.push_str(" AUTOINCREMENT");
                    }
                } else if !field.nullable {
                    column.push_str(" NOT NULL");
                }
                column
            })
            .collect();
        format!(
            "CREATE TABLE {} ({})",
            quote_ident(&self.table),
            columns.join(", ")
        )
    }

    pub fn get_all(&self) -> Result<Vec<T>> {
        let conn = self.db.connect()?;
        query_records(&conn, &self.select_sql(), &Params::default())
    }

    /// Records matching `predicate`, a SQL fragment placed after `WHERE`.
    pub fn get_where<P: Into<Params>>(&self, predicate: &str, params: P) -> Result<Vec<T>> {
        let conn = self.db.connect()?;
        let sql = format!("{} WHERE {predicate}", self.select_sql());
        query_records(&conn, &sql, &params.into())
    }

    pub fn get_by_id(&self, id: impl Into<Value>) -> Result<Option<T>> {
        let conn = self.db.connect()?;
        let sql = format!(
            "{} WHERE {} = ?",
            self.select_sql(),
            quote_ident(self.identity_field().name)
        );
        let records = query_records(&conn, &sql, &Params::Positional(vec![id.into()]))?;
        Ok(records.into_iter().next())
    }

    /// Inserts `record` and returns the row id SQLite assigned.
    ///
    /// An auto-increment identity is left out of the statement, whatever
    /// value the record carries.
    pub fn insert(&self, record: &T) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(&self.insert_sql(1))?;
        Params::positional(self.insert_values(record)).bind(&mut stmt)?;
        stmt.raw_execute()?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts every record inside one transaction and returns the count.
    ///
    /// With `preserve_order` the records go in one statement at a time, so
    /// identities increase in input order. Otherwise they are sent as
    /// multi-row statements. Any failure rolls the whole batch back.
    pub fn insert_many(&self, records: &[T], preserve_order: bool) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let inserted = if preserve_order || self.insert_columns().is_empty() {
            self.insert_each(&tx, records)
        } else {
            self.insert_batched(&tx, records)
        };

        match inserted {
            Ok(inserted) => {
                tx.commit()?;
                tracing::debug!(table = %self.table, inserted, preserve_order, "inserted batch");
                Ok(inserted)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(table = %self.table, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn insert_each(&self, conn: &Connection, records: &[T]) -> Result<usize> {
        let mut stmt = conn.prepare(&self.insert_sql(1))?;
        let mut inserted = 0;
        for record in records {
            Params::positional(self.insert_values(record)).bind(&mut stmt)?;
            inserted += stmt.raw_execute()?;
        }
        Ok(inserted)
    }

    fn insert_batched(&self, conn: &Connection, records: &[T]) -> Result<usize> {
        let per_row = self.insert_columns().len();
        let rows_per_statement = (MAX_BIND_PARAMETERS / per_row).max(1);
        let mut inserted = 0;
        for chunk in records.chunks(rows_per_statement) {
            let mut stmt = conn.prepare(&self.insert_sql(chunk.len()))?;
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|record| self.insert_values(record))
                .collect();
            Params::positional(values).bind(&mut stmt)?;
            inserted += stmt.raw_execute()?;
        }
        Ok(inserted)
    }

    /// Writes every non-identity field of `record` onto the row with the
    /// same identity. Returns whether a row was changed.
    pub fn update(&self, record: &T) -> Result<bool> {
        let fields = T::fields();
        let mut values = record.values();
        if values.len() != fields.len() {
            return Err(self.arity_error(values.len()));
        }
        let identity = values.remove(self.identity);

        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != self.identity)
            .map(|(_, field)| format!("{} = ?", quote_ident(field.name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(&self.table),
            assignments.join(", "),
            quote_ident(self.identity_field().name)
        );
        values.push(identity);

        let conn = self.db.connect()?;
        Ok(execute(&conn, &sql, &Params::positional(values))? > 0)
    }

    pub fn delete(&self, id: impl Into<Value>) -> Result<bool> {
        let conn = self.db.connect()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&self.table),
            quote_ident(self.identity_field().name)
        );
        Ok(execute(&conn, &sql, &Params::Positional(vec![id.into()]))? > 0)
    }

    pub fn delete_where<P: Into<Params>>(&self, predicate: &str, params: P) -> Result<usize> {
        let conn = self.db.connect()?;
        let sql = format!("DELETE FROM {} WHERE {predicate}", quote_ident(&self.table));
        execute(&conn, &sql, &params.into())
    }

    /// Runs a caller-supplied statement and returns the affected row count.
    pub fn execute<P: Into<Params>>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.db.connect()?;
        execute(&conn, sql, &params.into())
    }

    /// Runs a caller-supplied query and maps each row by column name.
    pub fn query<P: Into<Params>>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let conn = self.db.connect()?;
        query_records(&conn, sql, &params.into())
    }

    pub fn exists(&self, id: impl Into<Value>) -> Result<bool> {
        let predicate = format!("{} = ?", quote_ident(self.identity_field().name));
        let id: Value = id.into();
        Ok(self.count_where(&predicate, [id])? > 0)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let sql = format!("SELECT COUNT(1) FROM {}", quote_ident(&self.table));
        scalar(&conn, &sql, &Params::default())
    }

    pub fn count_where<P: Into<Params>>(&self, predicate: &str, params: P) -> Result<i64> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {predicate}",
            quote_ident(&self.table)
        );
        scalar(&conn, &sql, &params.into())
    }

    fn select_sql(&self) -> String {
        let columns: Vec<String> = T::fields()
            .iter()
            .map(|field| quote_ident(field.name))
            .collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(&self.table)
        )
    }

    /// Field indices written by INSERT.
    fn insert_columns(&self) -> Vec<usize> {
        (0..T::fields().len())
            .filter(|index| !(self.auto_increment && *index == self.identity))
            .collect()
    }

    fn insert_sql(&self, rows: usize) -> String {
        let fields = T::fields();
        let columns = self.insert_columns();
        if columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table));
        }

        let names: Vec<String> = columns
            .iter()
            .map(|index| quote_ident(fields[*index].name))
            .collect();
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(&self.table),
            names.join(", "),
            vec![placeholders; rows].join(", ")
        )
    }

    fn insert_values(&self, record: &T) -> Vec<Value> {
        let columns = self.insert_columns();
        record
            .values()
            .into_iter()
            .enumerate()
            .filter(|(index, _)| columns.contains(index))
            .map(|(_, value)| value)
            .collect()
    }

    fn arity_error(&self, found: usize) -> LoaderError {
        LoaderError::Schema(format!(
            "record for table '{}' produced {found} values for {} fields",
            self.table,
            T::fields().len()
        ))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn execute(conn: &Connection, sql: &str, params: &Params) -> Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;
    Ok(stmt.raw_execute()?)
}

fn scalar(conn: &Connection, sql: &str, params: &Params) -> Result<i64> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

fn query_records<T: Record>(conn: &Connection, sql: &str, params: &Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;
    let cols: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut rows = stmt.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let row = Row::from_sqlite(&cols, row)?;
        records.push(T::from_row(&row)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::{quote_ident, Database, Repository};
    use crate::LoaderError;

    crate::record! {
        #[derive(Clone, Debug, PartialEq)]
        struct Track {
            id: i64,
            title: String,
            length: Option<f64>,
        }
    }

    crate::record! {
        #[derive(Clone, Debug, PartialEq)]
        struct Tag {
            code: String,
            label: String,
        }
    }

    fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("must create temp dir");
        let db = Database::open(dir.path().join("nested").join("test.db")).expect("must open");
        (dir, db)
    }

    #[test]
    fn inferred_ddl_marks_identity_and_nullability() {
        let (_dir, db) = database();
        let repo = Repository::<Track>::new(db, "Tracks").expect("must build");
        assert_eq!(
            repo.create_table_sql(),
            "CREATE TABLE \"Tracks\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"title\" TEXT NOT NULL, \"length\" REAL)"
        );
    }

    #[test]
    fn text_identity_is_not_auto_incremented() {
        let (_dir, db) = database();
        let repo = Repository::<Tag>::with_identity(db.clone(), "Tags", "CODE", false)
            .expect("must build");
        assert!(!repo.is_auto_increment());
        assert_eq!(
            repo.create_table_sql(),
            "CREATE TABLE \"Tags\" (\"code\" TEXT PRIMARY KEY, \"label\" TEXT NOT NULL)"
        );

        let err = Repository::<Tag>::with_identity(db, "Tags", "code", true)
            .expect_err("text identity cannot auto-increment");
        assert!(matches!(err, LoaderError::Schema(_)));
    }

    #[test]
    fn unknown_identity_is_a_schema_error() {
        let (_dir, db) = database();
        let err = Repository::<Tag>::new(db, "Tags").expect_err("Tag has no id field");
        assert!(matches!(err, LoaderError::Schema(_)));
    }

    #[test]
    fn database_open_creates_parent_directories() {
        let (dir, db) = database();
        assert!(db.path().exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
