//! SQL adapter over `sqlx`'s `Any` driver.
//!
//! Postgres, MySQL and SQLite run through one [`AnyPool`]. MSSQL is known to
//! the dialect layer (quoting, paging, DDL) but has no runtime driver.

mod builder;
mod dialect;
mod row;

use std::sync::Arc;

use async_trait::async_trait;
use c15t_schema::{ID_FIELD, Tables};
use c15t_types::{FieldType, IdGeneration, Record};
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::{Any, AnyConnection, AnyPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use builder::{Bind, Statement, StatementBuilder, Window, to_bind};
pub use dialect::Dialect;

use crate::adapter::{Adapter, AdapterTransaction, CreateRequest, Query, UpdateRequest};
use crate::error::{AdapterError, Result};
use crate::mapper::ModelMapper;
use crate::where_clause::Where;
use row::decode_row;

// ============================================================================
// Database handle
// ============================================================================

/// A connection pool paired with its dialect.
#[derive(Debug, Clone)]
pub struct SqlDatabase {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlDatabase {
    /// Opens a pool for `url`.
    ///
    /// Fails when the URL scheme does not match `dialect` or the dialect has
    /// no driver. In-memory SQLite is pinned to a single long-lived
    /// connection, since every connection would otherwise see its own
    /// database.
    pub async fn connect(dialect: Dialect, url: &str, max_connections: u32) -> Result<Self> {
        if !dialect.has_driver() {
            return Err(AdapterError::UnsupportedDialect(dialect));
        }
        if Dialect::from_url(url) != Some(dialect) {
            return Err(AdapterError::DialectMismatch {
                dialect,
                scheme: url.split(':').next().unwrap_or_default().to_string(),
            });
        }

        sqlx::any::install_default_drivers();

        let in_memory = dialect == Dialect::Sqlite && is_memory_url(url);
        let mut options = AnyPoolOptions::new().max_connections(max_connections.max(1));
        if in_memory {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(url).await?;

        info!(
            dialect = %dialect,
            max_connections = if in_memory { 1 } else { max_connections },
            in_memory,
            "database pool opened"
        );

        Ok(Self { pool, dialect })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Executes a statement without parameters, returning affected rows.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql, "executing statement");
        let done = sqlx::query(sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    /// Round-trips a trivial query. Does not depend on any table.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Runs a query with text binds and returns every column of every row
    /// as text. Used for catalog introspection.
    pub async fn fetch_strings(&self, sql: &str, binds: &[&str]) -> Result<Vec<Vec<String>>> {
        debug!(sql, "executing query");
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind((*bind).to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| {
                        row.try_get::<Option<String>, _>(i)
                            .map(Option::unwrap_or_default)
                            .map_err(AdapterError::from)
                    })
                    .collect()
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

// ============================================================================
// Statement execution
// ============================================================================

fn build_query(statement: &Statement) -> sqlx::query::Query<'_, Any, AnyArguments<'_>> {
    let mut query = sqlx::query(&statement.sql);
    for bind in &statement.binds {
        query = match bind {
            Bind::Null(FieldType::Boolean) => query.bind(Option::<bool>::None),
            Bind::Null(FieldType::Number) => query.bind(Option::<i64>::None),
            Bind::Null(_) => query.bind(Option::<String>::None),
            Bind::Bool(b) => query.bind(*b),
            Bind::Int(n) => query.bind(*n),
            Bind::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

/// Executes adapter operations on a borrowed connection.
#[derive(Debug, Clone)]
struct SqlCore {
    mapper: ModelMapper,
    dialect: Dialect,
}

impl SqlCore {
    fn builder<'a>(&'a self, model: &str) -> Result<StatementBuilder<'a>> {
        Ok(StatementBuilder::new(self.dialect, self.mapper.table(model)?))
    }

    async fn fetch(&self, conn: &mut AnyConnection, model: &str, statement: &Statement) -> Result<Vec<Record>> {
        debug!(sql = %statement.sql, binds = statement.binds.len(), "executing query");
        let table = self.mapper.table(model)?;
        let rows = build_query(statement).fetch_all(&mut *conn).await?;
        rows.iter().map(|row| decode_row(table, row)).collect()
    }

    async fn write(&self, conn: &mut AnyConnection, model: &str, statement: &Statement) -> Result<u64> {
        debug!(sql = %statement.sql, binds = statement.binds.len(), "executing statement");
        let done = build_query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| AdapterError::from_database(model, e))?;
        Ok(done.rows_affected())
    }

    async fn fetch_by_id(
        &self,
        conn: &mut AnyConnection,
        model: &str,
        id: &str,
        select: Option<&[String]>,
    ) -> Result<Option<Record>> {
        let statement = self.builder(model)?.select(
            select,
            &[Where::eq(ID_FIELD, id)],
            Window {
                limit: Some(1),
                ..Window::default()
            },
        );
        let row = self.fetch(conn, model, &statement).await?.into_iter().next();
        row.map(|row| self.mapper.transform_output(model, row, select))
            .transpose()
    }

    async fn matching_ids(
        &self,
        conn: &mut AnyConnection,
        model: &str,
        clauses: &[Where],
        limit: Option<u64>,
    ) -> Result<Vec<String>> {
        let statement = self.builder(model)?.select_ids(clauses, limit);
        let rows = self.fetch(conn, model, &statement).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove(ID_FIELD) {
                Some(c15t_types::Value::String(id)) => Some(id),
                _ => None,
            })
            .collect())
    }

    async fn create(&self, conn: &mut AnyConnection, request: CreateRequest) -> Result<Record> {
        let model = request.model;
        self.mapper.check_select(&model, request.select.as_deref())?;
        let row = self.mapper.prepare_create(&model, request.data)?;
        let id = row
            .get(ID_FIELD)
            .and_then(c15t_types::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let statement = self.builder(&model)?.insert(&row);
        self.write(conn, &model, &statement).await?;
        match self
            .fetch_by_id(conn, &model, &id, request.select.as_deref())
            .await?
        {
            Some(created) => Ok(created),
            None => self.mapper.transform_output(&model, row, request.select.as_deref()),
        }
    }

    async fn find_many(&self, conn: &mut AnyConnection, query: Query) -> Result<Vec<Record>> {
        let model = query.model;
        self.mapper.check_sort(&model, query.sort_by.as_ref())?;
        self.mapper.check_select(&model, query.select.as_deref())?;
        let clauses = self.mapper.prepare_where(&model, query.where_clause)?;
        let statement = self.builder(&model)?.select(
            query.select.as_deref(),
            &clauses,
            Window {
                sort_by: query.sort_by.as_ref(),
                limit: query.limit,
                offset: query.offset,
            },
        );
        self.fetch(conn, &model, &statement)
            .await?
            .into_iter()
            .map(|row| self.mapper.transform_output(&model, row, query.select.as_deref()))
            .collect()
    }

    async fn find_one(&self, conn: &mut AnyConnection, query: Query) -> Result<Option<Record>> {
        Ok(self.find_many(conn, query.limit(1)).await?.into_iter().next())
    }

    async fn count(&self, conn: &mut AnyConnection, query: Query) -> Result<u64> {
        let clauses = self.mapper.prepare_where(&query.model, query.where_clause)?;
        let statement = self.builder(&query.model)?.count(&clauses);
        debug!(sql = %statement.sql, "executing count");
        let row = build_query(&statement).fetch_one(&mut *conn).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn update(&self, conn: &mut AnyConnection, request: UpdateRequest) -> Result<Option<Record>> {
        let model = request.model;
        let clauses = self.mapper.prepare_where(&model, request.where_clause)?;
        let update = self.mapper.prepare_update(&model, request.update)?;
        let Some(id) = self
            .matching_ids(conn, &model, &clauses, Some(1))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let statement = self
            .builder(&model)?
            .update(&update, &[Where::eq(ID_FIELD, id.as_str())]);
        self.write(conn, &model, &statement).await?;
        self.fetch_by_id(conn, &model, &id, None).await
    }

    async fn update_many(&self, conn: &mut AnyConnection, request: UpdateRequest) -> Result<u64> {
        let model = request.model;
        let clauses = self.mapper.prepare_where(&model, request.where_clause)?;
        let update = self.mapper.prepare_update(&model, request.update)?;
        let statement = self.builder(&model)?.update(&update, &clauses);
        self.write(conn, &model, &statement).await
    }

    async fn delete(&self, conn: &mut AnyConnection, query: Query) -> Result<bool> {
        let model = query.model;
        let clauses = self.mapper.prepare_where(&model, query.where_clause)?;
        let Some(id) = self
            .matching_ids(conn, &model, &clauses, Some(1))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };
        let statement = self
            .builder(&model)?
            .delete(&[Where::eq(ID_FIELD, id.as_str())]);
        Ok(self.write(conn, &model, &statement).await? > 0)
    }

    async fn delete_many(&self, conn: &mut AnyConnection, query: Query) -> Result<u64> {
        let clauses = self.mapper.prepare_where(&query.model, query.where_clause)?;
        let statement = self.builder(&query.model)?.delete(&clauses);
        self.write(conn, &query.model, &statement).await
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter issuing SQL through a [`SqlDatabase`] pool.
#[derive(Debug, Clone)]
pub struct SqlAdapter {
    core: SqlCore,
    db: SqlDatabase,
}

impl SqlAdapter {
    pub fn new(db: SqlDatabase, tables: Arc<Tables>) -> Self {
        Self::with_id_generation(db, tables, IdGeneration::default())
    }

    pub fn with_id_generation(db: SqlDatabase, tables: Arc<Tables>, id_generation: IdGeneration) -> Self {
        Self {
            core: SqlCore {
                mapper: ModelMapper::new(tables, id_generation),
                dialect: db.dialect(),
            },
            db,
        }
    }

    pub fn database(&self) -> &SqlDatabase {
        &self.db
    }

    pub fn mapper(&self) -> &ModelMapper {
        &self.core.mapper
    }
}

#[async_trait]
impl Adapter for SqlAdapter {
    fn id(&self) -> &'static str {
        "sql"
    }

    async fn create(&self, request: CreateRequest) -> Result<Record> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.create(&mut conn, request).await
    }

    async fn find_one(&self, query: Query) -> Result<Option<Record>> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.find_one(&mut conn, query).await
    }

    async fn find_many(&self, query: Query) -> Result<Vec<Record>> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.find_many(&mut conn, query).await
    }

    async fn count(&self, query: Query) -> Result<u64> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.count(&mut conn, query).await
    }

    async fn update(&self, request: UpdateRequest) -> Result<Option<Record>> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.update(&mut conn, request).await
    }

    async fn update_many(&self, request: UpdateRequest) -> Result<u64> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.update_many(&mut conn, request).await
    }

    async fn delete(&self, query: Query) -> Result<bool> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.delete(&mut conn, query).await
    }

    async fn delete_many(&self, query: Query) -> Result<u64> {
        let mut conn = self.db.pool.acquire().await?;
        self.core.delete_many(&mut conn, query).await
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        let tx = self.db.pool.begin().await?;
        debug!(dialect = %self.db.dialect, "transaction started");
        Ok(Box::new(SqlTransaction {
            core: self.core.clone(),
            tx: Mutex::new(Some(tx)),
        }))
    }
}

/// Adapter bound to an open SQL transaction.
///
/// Every call runs on the transaction's connection. Dropping it without
/// committing rolls back.
pub struct SqlTransaction {
    core: SqlCore,
    tx: Mutex<Option<sqlx::Transaction<'static, Any>>>,
}

impl std::fmt::Debug for SqlTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTransaction")
            .field("dialect", &self.core.dialect)
            .finish_non_exhaustive()
    }
}

macro_rules! on_tx {
    ($self:ident, $op:ident, $arg:expr) => {{
        let mut guard = $self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AdapterError::TransactionClosed)?;
        $self.core.$op(&mut **tx, $arg).await
    }};
}

#[async_trait]
impl Adapter for SqlTransaction {
    fn id(&self) -> &'static str {
        "sql"
    }

    async fn create(&self, request: CreateRequest) -> Result<Record> {
        on_tx!(self, create, request)
    }

    async fn find_one(&self, query: Query) -> Result<Option<Record>> {
        on_tx!(self, find_one, query)
    }

    async fn find_many(&self, query: Query) -> Result<Vec<Record>> {
        on_tx!(self, find_many, query)
    }

    async fn count(&self, query: Query) -> Result<u64> {
        on_tx!(self, count, query)
    }

    async fn update(&self, request: UpdateRequest) -> Result<Option<Record>> {
        on_tx!(self, update, request)
    }

    async fn update_many(&self, request: UpdateRequest) -> Result<u64> {
        on_tx!(self, update_many, request)
    }

    async fn delete(&self, query: Query) -> Result<bool> {
        on_tx!(self, delete, query)
    }

    async fn delete_many(&self, query: Query) -> Result<u64> {
        on_tx!(self, delete_many, query)
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        Err(AdapterError::NestedTransaction)
    }
}

#[async_trait]
impl AdapterTransaction for SqlTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(AdapterError::TransactionClosed)?;
        tx.commit().await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(AdapterError::TransactionClosed)?;
        tx.rollback().await?;
        debug!("transaction rolled back");
        Ok(())
    }

    fn as_adapter(&self) -> &dyn Adapter {
        self
    }
}
