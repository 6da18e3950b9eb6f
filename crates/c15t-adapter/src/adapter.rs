//! The backend-agnostic adapter interface.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use c15t_types::Record;
use tracing::warn;

use crate::error::Result;
use crate::mapper::SortBy;
use crate::where_clause::Where;

/// Boxed future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Input to [`Adapter::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub model: String,
    pub data: Record,
    pub select: Option<Vec<String>>,
}

impl CreateRequest {
    pub fn new(model: impl Into<String>, data: Record) -> Self {
        Self {
            model: model.into(),
            data,
            select: None,
        }
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Input to the read and delete operations.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub model: String,
    pub where_clause: Vec<Where>,
    pub select: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort_by: Option<SortBy>,
}

impl Query {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Adds a clause.
    pub fn filter(mut self, clause: Where) -> Self {
        self.where_clause.push(clause);
        self
    }

    /// Shorthand for `filter(Where::eq(field, value))`.
    pub fn eq(self, field: impl Into<String>, value: impl Into<c15t_types::Value>) -> Self {
        self.filter(Where::eq(field, value))
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = Some(sort_by);
        self
    }
}

/// Input to [`Adapter::update`] and [`Adapter::update_many`].
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub model: String,
    pub where_clause: Vec<Where>,
    pub update: Record,
}

impl UpdateRequest {
    pub fn new(model: impl Into<String>, update: Record) -> Self {
        Self {
            model: model.into(),
            where_clause: Vec::new(),
            update,
        }
    }

    pub fn filter(mut self, clause: Where) -> Self {
        self.where_clause.push(clause);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<c15t_types::Value>) -> Self {
        self.filter(Where::eq(field, value))
    }
}

/// Uniform CRUD contract over a storage backend.
///
/// Records use logical field names; adapters map them to columns. Every
/// operation resolves the model first and fails with
/// [`AdapterError::UnknownModel`](crate::AdapterError::UnknownModel) when it
/// is not in the table map.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short backend identifier, e.g. `memory`.
    fn id(&self) -> &'static str;

    /// Inserts a row and returns it as stored.
    async fn create(&self, request: CreateRequest) -> Result<Record>;

    /// First row matching the query, if any.
    async fn find_one(&self, query: Query) -> Result<Option<Record>>;

    /// All rows matching the query, honoring sort and paging.
    async fn find_many(&self, query: Query) -> Result<Vec<Record>>;

    /// Number of rows matching the query's `where` clauses.
    async fn count(&self, query: Query) -> Result<u64>;

    /// Updates the first matching row and returns it, `None` when nothing
    /// matched.
    async fn update(&self, request: UpdateRequest) -> Result<Option<Record>>;

    /// Updates every matching row, returning the number affected.
    async fn update_many(&self, request: UpdateRequest) -> Result<u64>;

    /// Deletes the first matching row. Returns false when nothing matched.
    async fn delete(&self, query: Query) -> Result<bool>;

    /// Deletes every matching row, returning the number removed.
    async fn delete_many(&self, query: Query) -> Result<u64>;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>>;
}

/// An adapter bound to an open transaction.
#[async_trait]
pub trait AdapterTransaction: Adapter {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    fn as_adapter(&self) -> &dyn Adapter;
}

/// Runs `f` inside a transaction.
///
/// Commits when `f` succeeds. When `f` fails the transaction is rolled back
/// and the original error returned. The closure may borrow anything that
/// outlives `adapter`.
///
/// ```no_run
/// # async fn demo(adapter: &dyn c15t_adapter::Adapter) -> c15t_adapter::Result<()> {
/// use c15t_adapter::{CreateRequest, transaction};
/// use c15t_types::record;
///
/// let subject = transaction(adapter, |tx| {
///     Box::pin(async move {
///         tx.create(CreateRequest::new("subject", record! { "isIdentified" => false }))
///             .await
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn transaction<'a, T, F>(adapter: &'a dyn Adapter, f: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t (dyn Adapter + 'a)) -> BoxFuture<'t, Result<T>> + Send,
{
    let tx = adapter.begin().await?;
    let result = {
        let handle: &(dyn Adapter + 'static) = &*tx;
        f(handle).await
    };
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(adapter = adapter.id(), error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
