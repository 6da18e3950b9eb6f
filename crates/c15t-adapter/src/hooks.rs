//! Before/after hook pipeline around create and update.
//!
//! Hooks are registered per `(model, operation, phase)`. Before hooks run in
//! registration order, each seeing the payload produced by the previous
//! one, and may abort the write. After hooks see the persisted result and
//! run for side effects only.
//!
//! ```
//! # async fn demo(adapter: &dyn c15t_adapter::Adapter, tables: std::sync::Arc<c15t_schema::Tables>)
//! #     -> c15t_adapter::Result<()> {
//! use c15t_adapter::hooks::{HookAction, HookOperation, HookRegistry, create_with_hooks};
//! use c15t_adapter::CreateRequest;
//! use c15t_types::record;
//!
//! let mut hooks = HookRegistry::new(tables);
//! hooks.before_fn("subject", HookOperation::Create, |_model, data| {
//!     if data.contains_key("externalId") {
//!         Ok(HookAction::Continue(None))
//!     } else {
//!         Ok(HookAction::Abort)
//!     }
//! })?;
//!
//! let created = create_with_hooks(
//!     adapter,
//!     &hooks,
//!     CreateRequest::new("subject", record! { "isIdentified" => false }),
//! )
//! .await?;
//! assert!(created.is_none());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use c15t_schema::Tables;
use c15t_types::Record;
use tracing::debug;

use crate::adapter::{Adapter, CreateRequest, UpdateRequest};
use crate::error::{AdapterError, HookError, Result};

/// Write operation a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookOperation {
    Create,
    Update,
}

/// When a hook runs relative to the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

/// Outcome of a before hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    /// Proceed. `Some` replaces the payload, `None` keeps it.
    Continue(Option<Record>),
    /// Stop without writing; the operation returns `None`.
    Abort,
}

/// What an after hook observes.
#[derive(Debug, Clone, Copy)]
pub enum Persisted<'a> {
    /// The created or updated row.
    Record(&'a Record),
    /// An `update_many`: the applied payload and the affected row count.
    Many { update: &'a Record, count: u64 },
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, model: &str, data: &Record) -> std::result::Result<HookAction, HookError>;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn after(&self, model: &str, persisted: Persisted<'_>) -> std::result::Result<(), HookError>;
}

/// Adapts a synchronous closure into a [`BeforeHook`].
pub struct FnBefore<F>(pub F);

#[async_trait]
impl<F> BeforeHook for FnBefore<F>
where
    F: Fn(&str, &Record) -> std::result::Result<HookAction, HookError> + Send + Sync,
{
    async fn before(&self, model: &str, data: &Record) -> std::result::Result<HookAction, HookError> {
        (self.0)(model, data)
    }
}

/// Adapts a synchronous closure into an [`AfterHook`].
pub struct FnAfter<F>(pub F);

#[async_trait]
impl<F> AfterHook for FnAfter<F>
where
    F: for<'a> Fn(&str, Persisted<'a>) -> std::result::Result<(), HookError> + Send + Sync,
{
    async fn after(&self, model: &str, persisted: Persisted<'_>) -> std::result::Result<(), HookError> {
        (self.0)(model, persisted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HookKey {
    model: String,
    operation: HookOperation,
    phase: HookPhase,
}

#[derive(Clone)]
enum Hook {
    Before(Arc<dyn BeforeHook>),
    After(Arc<dyn AfterHook>),
}

/// Hooks keyed by `(model, operation, phase)`.
#[derive(Clone)]
pub struct HookRegistry {
    tables: Arc<Tables>,
    hooks: HashMap<HookKey, Vec<Hook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(String, usize)> = self
            .hooks
            .iter()
            .map(|(key, hooks)| {
                (
                    format!("{}:{:?}:{:?}", key.model, key.operation, key.phase),
                    hooks.len(),
                )
            })
            .collect();
        counts.sort();
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}

impl HookRegistry {
    pub fn new(tables: Arc<Tables>) -> Self {
        Self {
            tables,
            hooks: HashMap::new(),
        }
    }

    /// Schema the hooks were registered against.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    fn register(&mut self, model: &str, operation: HookOperation, phase: HookPhase, hook: Hook) -> Result<()> {
        if !self.tables.contains(model) {
            return Err(AdapterError::HookModel(model.to_string()));
        }
        debug!(model, ?operation, ?phase, "hook registered");
        self.hooks
            .entry(HookKey {
                model: model.to_string(),
                operation,
                phase,
            })
            .or_default()
            .push(hook);
        Ok(())
    }

    pub fn before(
        &mut self,
        model: &str,
        operation: HookOperation,
        hook: impl BeforeHook + 'static,
    ) -> Result<&mut Self> {
        self.register(model, operation, HookPhase::Before, Hook::Before(Arc::new(hook)))?;
        Ok(self)
    }

    pub fn after(
        &mut self,
        model: &str,
        operation: HookOperation,
        hook: impl AfterHook + 'static,
    ) -> Result<&mut Self> {
        self.register(model, operation, HookPhase::After, Hook::After(Arc::new(hook)))?;
        Ok(self)
    }

    pub fn before_fn<F>(&mut self, model: &str, operation: HookOperation, f: F) -> Result<&mut Self>
    where
        F: Fn(&str, &Record) -> std::result::Result<HookAction, HookError> + Send + Sync + 'static,
    {
        self.before(model, operation, FnBefore(f))
    }

    pub fn after_fn<F>(&mut self, model: &str, operation: HookOperation, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&str, Persisted<'a>) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.after(model, operation, FnAfter(f))
    }

    /// Number of hooks registered for the key.
    pub fn len(&self, model: &str, operation: HookOperation, phase: HookPhase) -> usize {
        self.get(model, operation, phase).len()
    }

    fn get(&self, model: &str, operation: HookOperation, phase: HookPhase) -> &[Hook] {
        self.hooks
            .get(&HookKey {
                model: model.to_string(),
                operation,
                phase,
            })
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Runs the before chain. `None` means a hook aborted.
    async fn run_before(&self, model: &str, operation: HookOperation, mut data: Record) -> Result<Option<Record>> {
        for hook in self.get(model, operation, HookPhase::Before) {
            let Hook::Before(hook) = hook else { continue };
            match hook.before(model, &data).await.map_err(|source| hook_error(model, source))? {
                HookAction::Continue(Some(next)) => data = next,
                HookAction::Continue(None) => {}
                HookAction::Abort => {
                    debug!(model, ?operation, "before hook aborted write");
                    return Ok(None);
                }
            }
        }
        Ok(Some(data))
    }

    async fn run_after(&self, model: &str, operation: HookOperation, persisted: Persisted<'_>) -> Result<()> {
        for hook in self.get(model, operation, HookPhase::After) {
            let Hook::After(hook) = hook else { continue };
            hook.after(model, persisted)
                .await
                .map_err(|source| hook_error(model, source))?;
        }
        Ok(())
    }
}

fn hook_error(model: &str, source: HookError) -> AdapterError {
    AdapterError::Hook {
        model: model.to_string(),
        source,
    }
}

/// Creates a row through the hook pipeline.
///
/// Returns `Ok(None)` when a before hook aborts; nothing is written.
pub async fn create_with_hooks(
    adapter: &dyn Adapter,
    hooks: &HookRegistry,
    request: CreateRequest,
) -> Result<Option<Record>> {
    let CreateRequest {
        model,
        data,
        select,
    } = request;
    let Some(data) = hooks.run_before(&model, HookOperation::Create, data).await? else {
        return Ok(None);
    };
    let created = adapter
        .create(CreateRequest {
            model: model.clone(),
            data,
            select,
        })
        .await?;
    hooks
        .run_after(&model, HookOperation::Create, Persisted::Record(&created))
        .await?;
    Ok(Some(created))
}

/// Updates the first matching row through the hook pipeline.
///
/// Returns `Ok(None)` when a before hook aborts or nothing matched.
pub async fn update_with_hooks(
    adapter: &dyn Adapter,
    hooks: &HookRegistry,
    request: UpdateRequest,
) -> Result<Option<Record>> {
    let UpdateRequest {
        model,
        where_clause,
        update,
    } = request;
    let Some(update) = hooks.run_before(&model, HookOperation::Update, update).await? else {
        return Ok(None);
    };
    let updated = adapter
        .update(UpdateRequest {
            model: model.clone(),
            where_clause,
            update,
        })
        .await?;
    if let Some(record) = &updated {
        hooks
            .run_after(&model, HookOperation::Update, Persisted::Record(record))
            .await?;
    }
    Ok(updated)
}

/// Updates every matching row through the hook pipeline.
///
/// Returns the affected count, or `Ok(None)` when a before hook aborts.
pub async fn update_many_with_hooks(
    adapter: &dyn Adapter,
    hooks: &HookRegistry,
    request: UpdateRequest,
) -> Result<Option<u64>> {
    let UpdateRequest {
        model,
        where_clause,
        update,
    } = request;
    let Some(update) = hooks.run_before(&model, HookOperation::Update, update).await? else {
        return Ok(None);
    };
    let count = adapter
        .update_many(UpdateRequest {
            model: model.clone(),
            where_clause,
            update: update.clone(),
        })
        .await?;
    hooks
        .run_after(
            &model,
            HookOperation::Update,
            Persisted::Many {
                update: &update,
                count,
            },
        )
        .await?;
    Ok(Some(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Query;
    use crate::memory::MemoryAdapter;
    use c15t_schema::{SchemaOptions, get_consent_tables};
    use c15t_types::{Value, record};
    use std::sync::Mutex;

    fn setup() -> (MemoryAdapter, HookRegistry) {
        let tables = Arc::new(get_consent_tables(&SchemaOptions::default()).unwrap());
        (
            MemoryAdapter::new(Arc::clone(&tables)),
            HookRegistry::new(tables),
        )
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let (adapter, mut hooks) = setup();
        hooks
            .before_fn("subject", HookOperation::Create, |_, _| Ok(HookAction::Abort))
            .unwrap();
        let result = create_with_hooks(
            &adapter,
            &hooks,
            CreateRequest::new("subject", record! { "isIdentified" => false }),
        )
        .await
        .unwrap();
        assert!(result.is_none());
        assert_eq!(adapter.count(Query::new("subject")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_before_hooks_chain_in_order() {
        let (adapter, mut hooks) = setup();
        hooks
            .before_fn("subject", HookOperation::Create, |_, data| {
                let mut next = data.clone();
                next.insert("externalId".into(), Value::from("first"));
                Ok(HookAction::Continue(Some(next)))
            })
            .unwrap()
            .before_fn("subject", HookOperation::Create, |_, data| {
                let mut next = data.clone();
                let seen = data["externalId"].as_str().unwrap_or_default().to_string();
                next.insert("externalId".into(), Value::from(format!("{seen}-second")));
                Ok(HookAction::Continue(Some(next)))
            })
            .unwrap()
            .before_fn("subject", HookOperation::Create, |_, _| Ok(HookAction::Continue(None)))
            .unwrap();

        let created = create_with_hooks(&adapter, &hooks, CreateRequest::new("subject", record! {}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created["externalId"], Value::from("first-second"));
    }

    #[tokio::test]
    async fn test_after_hooks_see_persisted_record() {
        let (adapter, mut hooks) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hooks
            .after_fn("subject", HookOperation::Create, move |_, persisted| {
                if let Persisted::Record(record) = persisted {
                    sink.lock().unwrap().push(record["id"].clone());
                }
                Ok(())
            })
            .unwrap();
        let created = create_with_hooks(&adapter, &hooks, CreateRequest::new("subject", record! {}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![created["id"].clone()]);
    }

    #[tokio::test]
    async fn test_update_many_after_hook_gets_count() {
        let (adapter, mut hooks) = setup();
        for _ in 0..3 {
            adapter
                .create(CreateRequest::new("subject", record! {}))
                .await
                .unwrap();
        }
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        hooks
            .after_fn("subject", HookOperation::Update, move |_, persisted| {
                if let Persisted::Many { count, .. } = persisted {
                    sink.lock().unwrap().push(count);
                }
                Ok(())
            })
            .unwrap();
        let updated = update_many_with_hooks(
            &adapter,
            &hooks,
            UpdateRequest::new("subject", record! { "isIdentified" => true }),
        )
        .await
        .unwrap();
        assert_eq!(updated, Some(3));
        assert_eq!(*counts.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_hook_error_is_not_an_abort() {
        let (adapter, mut hooks) = setup();
        hooks
            .before_fn("subject", HookOperation::Update, |_, _| Err("rejected".into()))
            .unwrap();
        adapter
            .create(CreateRequest::new("subject", record! { "id" => "sub-1" }))
            .await
            .unwrap();
        let err = update_with_hooks(
            &adapter,
            &hooks,
            UpdateRequest::new("subject", record! { "isIdentified" => true }).eq("id", "sub-1"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AdapterError::Hook { .. }));
    }

    #[test]
    fn test_registration_validates_model() {
        let (_, mut hooks) = setup();
        let err = hooks
            .before_fn("user", HookOperation::Create, |_, _| Ok(HookAction::Abort))
            .unwrap_err();
        assert!(matches!(err, AdapterError::HookModel(model) if model == "user"));
        assert_eq!(hooks.len("user", HookOperation::Create, HookPhase::Before), 0);
    }
}
