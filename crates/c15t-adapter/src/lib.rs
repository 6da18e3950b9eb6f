//! Storage adapters for c15t.
//!
//! Provides the backend-agnostic [`Adapter`] contract with:
//! - An in-memory adapter for tests and ephemeral deployments
//! - A SQL adapter over `sqlx` for Postgres, MySQL and SQLite
//! - Field mapping, validation and where-clause evaluation shared by both
//! - A before/after hook pipeline around create and update

pub mod adapter;
pub mod error;
pub mod hooks;
pub mod mapper;
pub mod memory;
pub mod sql;
pub mod where_clause;

pub use adapter::{
    Adapter, AdapterTransaction, BoxFuture, CreateRequest, Query, UpdateRequest, transaction,
};
pub use error::{AdapterError, HookError, Result};
pub use hooks::{
    AfterHook, BeforeHook, HookAction, HookOperation, HookPhase, HookRegistry, Persisted,
    create_with_hooks, update_many_with_hooks, update_with_hooks,
};
pub use mapper::{ModelMapper, SortBy, SortDirection};
pub use memory::{MemoryAdapter, MemoryTransaction};
pub use sql::{Dialect, SqlAdapter, SqlDatabase, SqlTransaction};
pub use where_clause::{Connector, Operator, Where};
