//! Main entry point.
//!
//! `C15t` ties a table map, an adapter and a hook registry together. The
//! consent operations live in [`crate::consent`].

use std::fmt;
use std::sync::Arc;

use c15t_adapter::hooks::HookRegistry;
use c15t_adapter::{Adapter, Dialect, Query, SqlDatabase};
use c15t_config::C15tConfig;
use c15t_migration::{MigrationPlan, get_migrations};
use c15t_schema::{Entity, SchemaOptions, Subject, Tables, get_consent_tables};
use c15t_types::IdGeneration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::database::DatabaseConfig;
use crate::error::{C15tError, Result};

type ConfigureHooks = Box<dyn FnOnce(&mut HookRegistry) -> c15t_adapter::Result<()> + Send>;

/// Builder for [`C15t`].
pub struct C15tBuilder {
    database: DatabaseConfig,
    schema: SchemaOptions,
    id_generation: IdGeneration,
    hooks: Vec<ConfigureHooks>,
}

impl Default for C15tBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::Memory,
            schema: SchemaOptions::default(),
            id_generation: IdGeneration::default(),
            hooks: Vec::new(),
        }
    }
}

impl C15tBuilder {
    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    /// Table renames, column overrides, plugin schemas and extra fields.
    pub fn schema(mut self, schema: SchemaOptions) -> Self {
        self.schema = schema;
        self
    }

    /// Primary key strategy. Ignored by [`DatabaseConfig::Custom`].
    pub fn id_generation(mut self, id_generation: IdGeneration) -> Self {
        self.id_generation = id_generation;
        self
    }

    /// Registers hooks once the table map is known.
    ///
    /// ```
    /// # async fn demo() -> c15t::Result<()> {
    /// use c15t::C15t;
    /// use c15t::hooks::{HookAction, HookOperation};
    ///
    /// let c15t = C15t::builder()
    ///     .hooks(|registry| {
    ///         registry.before_fn("subject", HookOperation::Create, |_, _| {
    ///             Ok(HookAction::Continue(None))
    ///         })?;
    ///         Ok(())
    ///     })
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn hooks<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut HookRegistry) -> c15t_adapter::Result<()> + Send + 'static,
    {
        self.hooks.push(Box::new(configure));
        self
    }

    /// Validates the schema, opens storage and registers hooks.
    pub async fn build(self) -> Result<C15t> {
        let tables = Arc::new(get_consent_tables(&self.schema)?);
        let (adapter, database) = self
            .database
            .open(Arc::clone(&tables), self.id_generation)
            .await?;

        let mut hooks = HookRegistry::new(Arc::clone(&tables));
        for configure in self.hooks {
            configure(&mut hooks)?;
        }

        info!(
            adapter = adapter.id(),
            dialect = ?database.as_ref().map(SqlDatabase::dialect),
            tables = tables.len(),
            "c15t ready"
        );

        Ok(C15t {
            tables,
            adapter,
            hooks: Arc::new(hooks),
            database,
        })
    }
}

/// Health report returned by [`C15t::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub version: String,
    pub adapter: String,
    pub dialect: Option<Dialect>,
    /// Whether the database answers a query that needs no table.
    pub database_ok: bool,
    /// Whether the consent tables can be queried.
    pub schema_ready: bool,
    pub tables: usize,
    pub checked_at: DateTime<Utc>,
}

/// A consent store.
///
/// Cheap to clone; clones share the adapter and hooks.
#[derive(Clone)]
pub struct C15t {
    pub(crate) tables: Arc<Tables>,
    pub(crate) adapter: Arc<dyn Adapter>,
    pub(crate) hooks: Arc<HookRegistry>,
    database: Option<SqlDatabase>,
}

impl C15t {
    pub fn builder() -> C15tBuilder {
        C15tBuilder::default()
    }

    /// Builds an instance from loaded configuration.
    pub async fn from_config(config: &C15tConfig) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .database(DatabaseConfig::from(&config.database))
            .schema(config.schema_options()?)
            .id_generation(config.id_generation())
            .build()
            .await
    }

    /// An instance backed by the memory adapter.
    pub async fn in_memory() -> Result<Self> {
        Self::builder().build().await
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// The SQL pool, when storage is SQL.
    pub fn database(&self) -> Option<&SqlDatabase> {
        self.database.as_ref()
    }

    fn sql_database(&self) -> Result<&SqlDatabase> {
        self.database
            .as_ref()
            .ok_or(C15tError::NoSqlDatabase(self.adapter.id()))
    }

    /// Diffs the live database against the table map without changing it.
    pub async fn migration_plan(&self) -> Result<MigrationPlan> {
        Ok(get_migrations(self.sql_database()?, &self.tables).await?)
    }

    /// Creates missing tables and columns. Returns the plan that was applied.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<MigrationPlan> {
        let db = self.sql_database()?;
        let plan = get_migrations(db, &self.tables).await?;
        plan.run(db).await?;
        Ok(plan)
    }

    /// Reports the backend and whether it answers queries.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Status {
        let schema = self.adapter.count(Query::new(Subject::MODEL)).await;
        let database_ok = match &self.database {
            Some(db) => match db.ping().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(dialect = %db.dialect(), error = %err, "database ping failed");
                    false
                }
            },
            None => schema.is_ok(),
        };
        let schema_ready = match schema {
            Ok(_) => true,
            Err(err) => {
                debug!(adapter = self.adapter.id(), error = %err, "consent tables not queryable");
                false
            }
        };
        Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            adapter: self.adapter.id().to_string(),
            dialect: self.database.as_ref().map(SqlDatabase::dialect),
            database_ok,
            schema_ready,
            tables: self.tables.len(),
            checked_at: Utc::now(),
        }
    }

    /// Closes the SQL pool, if any.
    pub async fn close(&self) {
        if let Some(db) = &self.database {
            db.close().await;
        }
    }
}

impl fmt::Debug for C15t {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("C15t")
            .field("adapter", &self.adapter.id())
            .field("dialect", &self.database.as_ref().map(SqlDatabase::dialect))
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_adapter::hooks::{HookOperation, HookPhase};
    use c15t_config::StorageKind;

    #[tokio::test]
    async fn test_in_memory_status() {
        let c15t = C15t::in_memory().await.unwrap();
        let status = c15t.status().await;
        assert_eq!(status.adapter, "memory");
        assert_eq!(status.dialect, None);
        assert!(status.database_ok);
        assert!(status.schema_ready);
        assert_eq!(status.tables, 11);
    }

    #[tokio::test]
    async fn test_status_before_migration() {
        let c15t = C15t::builder()
            .database(DatabaseConfig::from_url("sqlite::memory:").unwrap())
            .build()
            .await
            .unwrap();
        let status = c15t.status().await;
        assert!(status.database_ok);
        assert!(!status.schema_ready);

        c15t.migrate().await.unwrap();
        assert!(c15t.status().await.schema_ready);
    }

    #[tokio::test]
    async fn test_memory_cannot_migrate() {
        let c15t = C15t::in_memory().await.unwrap();
        assert!(matches!(
            c15t.migrate().await,
            Err(C15tError::NoSqlDatabase("memory"))
        ));
    }

    #[tokio::test]
    async fn test_hooks_registered_at_build() {
        let c15t = C15t::builder()
            .hooks(|registry| {
                registry.after_fn("consent", HookOperation::Create, |_, _| Ok(()))?;
                Ok(())
            })
            .build()
            .await
            .unwrap();
        assert_eq!(
            c15t.hooks().len("consent", HookOperation::Create, HookPhase::After),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_hook_model_fails_build() {
        let result = C15t::builder()
            .hooks(|registry| {
                registry.after_fn("user", HookOperation::Create, |_, _| Ok(()))?;
                Ok(())
            })
            .build()
            .await;
        assert!(matches!(
            result,
            Err(C15tError::Adapter(c15t_adapter::AdapterError::HookModel(_)))
        ));
    }

    #[tokio::test]
    async fn test_from_memory_config() {
        let mut config = C15tConfig::default();
        config.database.adapter = StorageKind::Memory;
        let c15t = C15t::from_config(&config).await.unwrap();
        assert_eq!(c15t.adapter().id(), "memory");
    }
}
