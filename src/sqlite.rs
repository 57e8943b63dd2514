//! Row store over an embedded SQLite database.
//!
//! The store opens its connection lazily on first use and keeps every write of
//! a session in one transaction until [`RowStore::commit`] or
//! [`RowStore::rollback`]. Dropping a store with an open transaction rolls it
//! back.

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path understood by SQLite as a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Errors surfaced by the row store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed table definition or identifier.
    #[error("schema error: {0}")]
    Schema(String),
    /// A uniqueness or primary-key constraint rejected a write.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// A single-row query matched nothing and no default was supplied.
    #[error("no matching row")]
    NotFound,
    /// A single-row query matched more than one row.
    #[error("query matched more than one row")]
    AmbiguousResult,
    /// A single-column query returned some other number of columns.
    #[error("expected exactly one column, query returned {actual}")]
    ColumnCount { actual: usize },
    /// A value could not be represented as SQLite text.
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("failed to open sqlite database at {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let classified = match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Some(StoreError::Integrity(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                ))
            }
            rusqlite::Error::Utf8Error(source) => Some(StoreError::Encoding(source.to_string())),
            rusqlite::Error::NulError(source) => Some(StoreError::Encoding(source.to_string())),
            rusqlite::Error::FromSqlConversionFailure(_, _, source)
                if source.is::<std::str::Utf8Error>() =>
            {
                Some(StoreError::Encoding(source.to_string()))
            }
            _ => None,
        };
        classified.unwrap_or_else(|| StoreError::Sqlite(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Boolean(flag) => Some(i64::from(*flag)),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

/// Dates are stored in their `YYYY-MM-DD` text form.
impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Text(value.format("%Y-%m-%d").to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Value::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Value::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Value::Boolean(flag) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*flag))),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(value) => Value::Integer(value),
            ValueRef::Real(value) => Value::Real(value),
            ValueRef::Text(bytes) => Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|err| FromSqlError::Other(Box::new(err)))?
                    .to_string(),
            ),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        })
    }
}

/// Field bindings for a row write, kept in insertion order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<(String, Value)>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value, replacing an earlier binding of the same name
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.values.iter_mut().find(|(field, _)| field == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Schema definition for the SQLite database
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Renders the `CREATE TABLE IF NOT EXISTS` statement, validating every
    /// identifier before it is interpolated.
    pub fn create_sql(&self) -> Result<String> {
        validate_identifier("table", &self.name)?;
        if self.columns.is_empty() {
            return Err(StoreError::Schema(format!(
                "table `{}` has no columns",
                self.name
            )));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.columns.len());
        let mut primary_keys = 0;
        let mut rendered = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(StoreError::Schema(format!(
                    "a column of table `{}` is missing a name",
                    self.name
                )));
            }
            validate_identifier("column", &column.name)?;
            if seen.contains(&column.name.as_str()) {
                return Err(StoreError::Schema(format!(
                    "duplicate column `{}` in table `{}`",
                    column.name, self.name
                )));
            }
            seen.push(&column.name);
            if column.is_primary_key() {
                primary_keys += 1;
            }
            rendered.push(column.render()?);
        }
        if primary_keys > 1 {
            return Err(StoreError::Schema(format!(
                "table `{}` declares more than one primary key column",
                self.name
            )));
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&self.name),
            rendered.join(", ")
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: Option<DataType>,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            constraints: Vec::new(),
            default_value: None,
        }
    }

    pub fn of_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn primary_key(self) -> Self {
        self.with_constraint(ColumnConstraint::PrimaryKey)
    }

    pub fn auto_increment(self) -> Self {
        self.with_constraint(ColumnConstraint::AutoIncrement)
    }

    pub fn not_null(self) -> Self {
        self.with_constraint(ColumnConstraint::NotNull)
    }

    pub fn unique(self) -> Self {
        self.with_constraint(ColumnConstraint::Unique)
    }

    pub fn with_default(mut self, default_value: DefaultValue) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.has(ColumnConstraint::PrimaryKey)
    }

    fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        if !self.has(constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    fn has(&self, constraint: ColumnConstraint) -> bool {
        self.constraints.contains(&constraint)
    }

    fn render(&self) -> Result<String> {
        let mut parts = vec![quote_identifier(&self.name)];
        if let Some(data_type) = self.data_type {
            parts.push(data_type.as_sql().to_string());
        }
        if self.is_primary_key() {
            parts.push("PRIMARY KEY".to_string());
        }
        if self.has(ColumnConstraint::AutoIncrement) {
            // SQLite only accepts AUTOINCREMENT on an INTEGER PRIMARY KEY.
            if !self.is_primary_key() || self.data_type != Some(DataType::Integer) {
                return Err(StoreError::Schema(format!(
                    "column `{}` must be an INTEGER PRIMARY KEY to auto-increment",
                    self.name
                )));
            }
            parts.push("AUTOINCREMENT".to_string());
        }
        if self.has(ColumnConstraint::NotNull) {
            parts.push("NOT NULL".to_string());
        }
        if self.has(ColumnConstraint::Unique) {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default_value) = &self.default_value {
            parts.push(format!("DEFAULT {}", default_value.as_sql()));
        }
        Ok(parts.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
    Date,
    DateTime,
}

impl DataType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    AutoIncrement,
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn as_sql(&self) -> String {
        match self {
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Text(text) => format!("'{}'", text.replace('\'', "''")),
            DefaultValue::Real(value) => value.to_string(),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

/// Identifiers cannot be bound as parameters, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is ever interpolated into SQL.
fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::Schema(format!("invalid {kind} name `{name}`")))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// Decodes one result row into a caller-chosen representation.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// A row as a plain tuple of values, in column order.
impl FromRow for Vec<Value> {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let count = row.as_ref().column_count();
        (0..count).map(|idx| row.get(idx)).collect()
    }
}

/// A row labelled with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl FromRow for Record {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let columns: Vec<String> = row
            .as_ref()
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let values = Vec::<Value>::from_row(row)?;
        Ok(Self { columns, values })
    }
}

/// SQLite store configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Tables ensured by [`RowStore::initialize_schema`]
    pub schema: Schema,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<String>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
        }
    }

    pub fn in_memory(schema: Schema) -> Self {
        Self::new(IN_MEMORY, schema)
    }
}

pub struct RowStore {
    config: SqliteConfig,
    connection: Option<Connection>,
}

impl RowStore {
    /// Create a store for the given config. No connection is opened until
    /// the first operation that needs one.
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.config.db_path
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether writes are staged and waiting for `commit` or `rollback`.
    pub fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    /// Ensure every table of the configured schema exists.
    pub fn initialize_schema(&mut self) -> Result<()> {
        let schema = self.config.schema.clone();
        self.ensure_schema(&schema)
    }

    pub fn ensure_schema(&mut self, schema: &Schema) -> Result<()> {
        for table in &schema.tables {
            self.ensure_table(table)?;
        }
        Ok(())
    }

    /// Create the table if it does not exist yet. Safe to call every session.
    pub fn ensure_table(&mut self, table: &TableDefinition) -> Result<()> {
        let sql = table.create_sql()?;
        debug!("ensuring table: {}", sql);
        self.connection()?.execute(&sql, [])?;
        Ok(())
    }

    /// Append one row, returning its rowid.
    pub fn insert(&mut self, table: &str, fields: &Params) -> Result<i64> {
        self.write_row("INSERT", table, fields)
    }

    /// Insert one row, replacing in full any row it collides with on a
    /// unique or primary key.
    pub fn upsert(&mut self, table: &str, fields: &Params) -> Result<i64> {
        self.write_row("REPLACE", table, fields)
    }

    fn write_row(&mut self, verb: &str, table: &str, fields: &Params) -> Result<i64> {
        validate_identifier("table", table)?;
        if fields.is_empty() {
            return Err(StoreError::Schema(format!(
                "no fields given for a write to `{table}`"
            )));
        }
        let mut names = Vec::with_capacity(fields.values.len());
        for (name, _) in &fields.values {
            validate_identifier("column", name)?;
            names.push(quote_identifier(name));
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "{verb} INTO {} ({}) VALUES ({placeholders})",
            quote_identifier(table),
            names.join(", ")
        );

        let conn = self.writer()?;
        conn.execute(
            &sql,
            params_from_iter(fields.values.iter().map(|(_, value)| value)),
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Run a read query and collect every row.
    pub fn query_all<T: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(T::from_row(row)?);
        }
        Ok(result)
    }

    /// At most one row: `None` when nothing matches, an error when several do.
    pub fn query_optional<T: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Option<T>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let first = match rows.next()? {
            Some(row) => T::from_row(row)?,
            None => return Ok(None),
        };
        if rows.next()?.is_some() {
            return Err(StoreError::AmbiguousResult);
        }
        Ok(Some(first))
    }

    /// Exactly one row.
    pub fn query_one<T: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<T> {
        self.query_optional(sql, params)?.ok_or(StoreError::NotFound)
    }

    /// One row, or `default` when nothing matches.
    pub fn query_one_or<T: FromRow>(
        &mut self,
        sql: &str,
        params: &[Value],
        default: T,
    ) -> Result<T> {
        Ok(self.query_optional(sql, params)?.unwrap_or(default))
    }

    /// Single value of a single-column query that matches at most one row.
    pub fn query_column_optional<T: FromSql>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<T>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let actual = stmt.column_count();
        if actual != 1 {
            return Err(StoreError::ColumnCount { actual });
        }
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let first: T = match rows.next()? {
            Some(row) => row.get(0)?,
            None => return Ok(None),
        };
        if rows.next()?.is_some() {
            return Err(StoreError::AmbiguousResult);
        }
        Ok(Some(first))
    }

    pub fn query_column<T: FromSql>(&mut self, sql: &str, params: &[Value]) -> Result<T> {
        self.query_column_optional(sql, params)?
            .ok_or(StoreError::NotFound)
    }

    pub fn query_column_or<T: FromSql>(
        &mut self,
        sql: &str,
        params: &[Value],
        default: T,
    ) -> Result<T> {
        Ok(self.query_column_optional(sql, params)?.unwrap_or(default))
    }

    /// Make staged writes durable. No-op before the connection is opened.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
                debug!("committed transaction on {}", self.config.db_path);
            }
        }
        Ok(())
    }

    /// Discard staged writes. No-op before the connection is opened.
    pub fn rollback(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
                warn!("rolled back transaction on {}", self.config.db_path);
            }
        }
        Ok(())
    }

    /// Run `work` as one unit: committed when it returns `Ok`, rolled back
    /// when it returns `Err`.
    pub fn transaction<T, E, F>(&mut self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!("rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Roll back anything uncommitted and release the connection.
    pub fn close(mut self) -> Result<()> {
        self.rollback()?;
        if let Some(conn) = self.connection.take() {
            conn.close().map_err(|(_, err)| StoreError::from(err))?;
        }
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => open_connection(&self.config.db_path)?,
        };
        Ok(self.connection.insert(conn))
    }

    /// Connection with a transaction open for staging writes.
    fn writer(&mut self) -> Result<&mut Connection> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }
}

impl Drop for RowStore {
    fn drop(&mut self) {
        if self.in_transaction() {
            if let Err(err) = self.rollback() {
                warn!("failed to roll back on drop: {}", err);
            }
        }
    }
}

fn open_connection(db_path: &str) -> Result<Connection> {
    info!("opening sqlite store at path: {}", db_path);
    if db_path != IN_MEMORY {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| StoreError::Open {
                    path: db_path.to_string(),
                    reason: err.to_string(),
                })?;
            }
        }
    }
    Connection::open(db_path).map_err(|err| StoreError::Open {
        path: db_path.to_string(),
        reason: err.to_string(),
    })
}
