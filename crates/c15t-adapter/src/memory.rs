//! In-memory adapter.
//!
//! Rows live in a map of model name to row list behind a
//! [`std::sync::RwLock`]. Intended for tests and development; nothing is
//! persisted.
//!
//! Constraints the SQL backends enforce are emulated here so behavior stays
//! aligned across adapters:
//! - unique fields and the primary key reject duplicates (`CONFLICT`)
//! - non-null references must point at an existing row
//! - deletes follow each reference's `on_delete` policy
//!
//! Transactions work on a snapshot of the whole state. Commit replaces the
//! shared state with the snapshot; rollback drops it. Writes made to the
//! shared state while a transaction is open are lost on commit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use c15t_schema::{ID_FIELD, OnDelete, Tables};
use c15t_types::{IdGeneration, Record, Value};
use tracing::debug;

use crate::adapter::{Adapter, AdapterTransaction, CreateRequest, Query, UpdateRequest};
use crate::error::{AdapterError, Result};
use crate::mapper::{ModelMapper, SortBy, SortDirection};
use crate::where_clause::{Where, matches_where};

type State = BTreeMap<String, Vec<Record>>;

/// Adapter storing rows in process memory.
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    mapper: ModelMapper,
    state: Arc<RwLock<State>>,
}

impl MemoryAdapter {
    pub fn new(tables: Arc<Tables>) -> Self {
        Self::with_id_generation(tables, IdGeneration::default())
    }

    pub fn with_id_generation(tables: Arc<Tables>, id_generation: IdGeneration) -> Self {
        Self {
            mapper: ModelMapper::new(tables, id_generation),
            state: Arc::new(RwLock::new(State::new())),
        }
    }

    pub fn mapper(&self) -> &ModelMapper {
        &self.mapper
    }

    /// Number of rows stored for `model`.
    pub fn len(&self, model: &str) -> Result<usize> {
        Ok(self.read()?.get(model).map_or(0, Vec::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| AdapterError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| AdapterError::LockPoisoned)
    }

    fn select<'a>(&self, state: &'a State, model: &str, clauses: &[Where]) -> Vec<&'a Record> {
        state
            .get(model)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_where(row, clauses))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn output(&self, model: &str, row: &Record, select: Option<&[String]>) -> Result<Record> {
        self.mapper.transform_output(model, row.clone(), select)
    }

    /// Rejects `row` when a unique value is already taken by another row.
    ///
    /// `existing` is the id of the row being replaced on update.
    fn check_unique(
        &self,
        state: &State,
        model: &str,
        row: &Record,
        existing: Option<&str>,
    ) -> Result<()> {
        let table = self.mapper.table(model)?;
        let unique_fields = std::iter::once(ID_FIELD).chain(
            table
                .fields
                .iter()
                .filter(|(_, field)| field.unique)
                .map(|(name, _)| name.as_str()),
        );
        let others: Vec<&Record> = state
            .get(model)
            .map(|rows| {
                rows.iter()
                    .filter(|other| existing.is_none() || row_id(other) != existing)
                    .collect()
            })
            .unwrap_or_default();
        for name in unique_fields {
            let Some(value) = row.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            if others.iter().any(|other| other.get(name) == Some(value)) {
                return Err(AdapterError::Conflict {
                    model: model.to_string(),
                    detail: format!("duplicate value for `{name}`"),
                });
            }
        }
        Ok(())
    }

    /// Rejects `row` when a non-null reference points nowhere.
    fn check_references(&self, state: &State, model: &str, row: &Record) -> Result<()> {
        let table = self.mapper.table(model)?;
        for (name, field) in &table.fields {
            let (Some(reference), Some(value)) = (
                &field.references,
                row.get(name).filter(|v| !v.is_null()),
            ) else {
                continue;
            };
            let exists = state.get(&reference.model).is_some_and(|rows| {
                rows.iter()
                    .any(|target| target.get(&reference.field) == Some(value))
            });
            if !exists {
                return Err(AdapterError::ForeignKey {
                    model: model.to_string(),
                    detail: format!("`{name}` references missing {} {value}", reference.model),
                });
            }
        }
        Ok(())
    }

    /// Removes rows of `model` with the given ids, applying `on_delete`
    /// policies of every referencing field first.
    fn delete_ids(&self, state: &mut State, model: &str, ids: &BTreeSet<String>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tables = self.mapper.tables();
        for (table, field) in tables.referencing(model) {
            let Some(reference) = table.field(field).and_then(|f| f.references.as_ref()) else {
                continue;
            };
            let dependents: BTreeSet<String> = state
                .get(&table.model)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| references_any(row, field, ids))
                        .filter_map(|row| row_id(row).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if dependents.is_empty() {
                continue;
            }
            match reference.on_delete {
                OnDelete::Cascade => {
                    debug!(model, dependent = %table.model, count = dependents.len(), "cascading delete");
                    self.delete_ids(state, &table.model, &dependents)?;
                }
                OnDelete::SetNull => {
                    if let Some(rows) = state.get_mut(&table.model) {
                        for row in rows
                            .iter_mut()
                            .filter(|row| references_any(row, field, ids))
                        {
                            row.insert(field.to_string(), Value::Null);
                        }
                    }
                }
                OnDelete::Restrict | OnDelete::NoAction => {
                    return Err(AdapterError::Restricted {
                        model: model.to_string(),
                        referenced_by: format!("{}.{field}", table.model),
                    });
                }
            }
        }
        let Some(rows) = state.get_mut(model) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| row_id(row).is_none_or(|id| !ids.contains(id)));
        Ok((before - rows.len()) as u64)
    }

    fn delete_matching(&self, query: Query, first_only: bool) -> Result<u64> {
        let clauses = self.mapper.prepare_where(&query.model, query.where_clause)?;
        let mut state = self.write()?;
        let mut ids: Vec<String> = self
            .select(&state, &query.model, &clauses)
            .into_iter()
            .filter_map(|row| row_id(row).map(str::to_string))
            .collect();
        if first_only {
            ids.truncate(1);
        }
        let ids: BTreeSet<String> = ids.into_iter().collect();

        // A restricted cascade must leave no partial deletes.
        let mut next = state.clone();
        let removed = self.delete_ids(&mut next, &query.model, &ids)?;
        *state = next;
        Ok(removed)
    }

    fn update_matching(&self, request: UpdateRequest, first_only: bool) -> Result<Vec<Record>> {
        let model = request.model;
        let clauses = self.mapper.prepare_where(&model, request.where_clause)?;
        let update = self.mapper.prepare_update(&model, request.update)?;
        let mut state = self.write()?;

        let mut targets: Vec<String> = self
            .select(&state, &model, &clauses)
            .into_iter()
            .filter_map(|row| row_id(row).map(str::to_string))
            .collect();
        if first_only {
            targets.truncate(1);
        }

        let mut next = state.clone();
        let mut updated = Vec::with_capacity(targets.len());
        for id in &targets {
            let Some(position) = next
                .get(&model)
                .and_then(|rows| rows.iter().position(|row| row_id(row) == Some(id.as_str())))
            else {
                continue;
            };
            let mut row = next[&model][position].clone();
            row.extend(update.clone());
            self.check_unique(&next, &model, &row, Some(id.as_str()))?;
            self.check_references(&next, &model, &row)?;
            if let Some(rows) = next.get_mut(&model) {
                rows[position] = row.clone();
            }
            updated.push(row);
        }
        *state = next;
        Ok(updated)
    }
}

fn row_id(row: &Record) -> Option<&str> {
    row.get(ID_FIELD).and_then(Value::as_str)
}

fn references_any(row: &Record, field: &str, ids: &BTreeSet<String>) -> bool {
    row.get(field)
        .and_then(Value::as_str)
        .is_some_and(|v| ids.contains(v))
}

fn sort_rows(rows: &mut [&Record], sort_by: &SortBy) {
    rows.sort_by(|a, b| {
        let left = a.get(&sort_by.field).unwrap_or(&Value::Null);
        let right = b.get(&sort_by.field).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
        };
        match sort_by.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, request: CreateRequest) -> Result<Record> {
        let model = request.model;
        self.mapper.check_select(&model, request.select.as_deref())?;
        let row = self.mapper.prepare_create(&model, request.data)?;
        let mut state = self.write()?;
        self.check_unique(&state, &model, &row, None)?;
        self.check_references(&state, &model, &row)?;
        state.entry(model.clone()).or_default().push(row.clone());
        drop(state);
        self.output(&model, &row, request.select.as_deref())
    }

    async fn find_one(&self, query: Query) -> Result<Option<Record>> {
        let mut rows = self.find_many(query.limit(1)).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn find_many(&self, query: Query) -> Result<Vec<Record>> {
        let model = query.model;
        self.mapper.check_sort(&model, query.sort_by.as_ref())?;
        self.mapper.check_select(&model, query.select.as_deref())?;
        let clauses = self.mapper.prepare_where(&model, query.where_clause)?;
        let state = self.read()?;
        let mut rows = self.select(&state, &model, &clauses);
        if let Some(sort_by) = &query.sort_by {
            sort_rows(&mut rows, sort_by);
        }
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| self.output(&model, row, query.select.as_deref()))
            .collect()
    }

    async fn count(&self, query: Query) -> Result<u64> {
        let clauses = self.mapper.prepare_where(&query.model, query.where_clause)?;
        let state = self.read()?;
        Ok(self.select(&state, &query.model, &clauses).len() as u64)
    }

    async fn update(&self, request: UpdateRequest) -> Result<Option<Record>> {
        let model = request.model.clone();
        let mut updated = self.update_matching(request, true)?;
        match updated.pop() {
            Some(row) => self.output(&model, &row, None).map(Some),
            None => Ok(None),
        }
    }

    async fn update_many(&self, request: UpdateRequest) -> Result<u64> {
        Ok(self.update_matching(request, false)?.len() as u64)
    }

    async fn delete(&self, query: Query) -> Result<bool> {
        Ok(self.delete_matching(query, true)? > 0)
    }

    async fn delete_many(&self, query: Query) -> Result<u64> {
        self.delete_matching(query, false)
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        let snapshot = self.read()?.clone();
        Ok(Box::new(MemoryTransaction {
            inner: MemoryAdapter {
                mapper: self.mapper.clone(),
                state: Arc::new(RwLock::new(snapshot)),
            },
            parent: Arc::clone(&self.state),
        }))
    }
}

/// Snapshot transaction over a [`MemoryAdapter`].
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: MemoryAdapter,
    parent: Arc<RwLock<State>>,
}

#[async_trait]
impl Adapter for MemoryTransaction {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, request: CreateRequest) -> Result<Record> {
        self.inner.create(request).await
    }

    async fn find_one(&self, query: Query) -> Result<Option<Record>> {
        self.inner.find_one(query).await
    }

    async fn find_many(&self, query: Query) -> Result<Vec<Record>> {
        self.inner.find_many(query).await
    }

    async fn count(&self, query: Query) -> Result<u64> {
        self.inner.count(query).await
    }

    async fn update(&self, request: UpdateRequest) -> Result<Option<Record>> {
        self.inner.update(request).await
    }

    async fn update_many(&self, request: UpdateRequest) -> Result<u64> {
        self.inner.update_many(request).await
    }

    async fn delete(&self, query: Query) -> Result<bool> {
        self.inner.delete(query).await
    }

    async fn delete_many(&self, query: Query) -> Result<u64> {
        self.inner.delete_many(query).await
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        Err(AdapterError::NestedTransaction)
    }
}

#[async_trait]
impl AdapterTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let snapshot = self.inner.read()?.clone();
        let mut parent = self.parent.write().map_err(|_| AdapterError::LockPoisoned)?;
        *parent = snapshot;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn as_adapter(&self) -> &dyn Adapter {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_schema::{SchemaOptions, get_consent_tables};
    use c15t_types::record;

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new(Arc::new(get_consent_tables(&SchemaOptions::default()).unwrap()))
    }

    async fn subject(adapter: &MemoryAdapter) -> String {
        let row = adapter
            .create(CreateRequest::new("subject", record! { "isIdentified" => false }))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    async fn domain(adapter: &MemoryAdapter, name: &str) -> String {
        let row = adapter
            .create(CreateRequest::new("domain", record! { "name" => name }))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_unique_violation_is_conflict() {
        let adapter = adapter();
        domain(&adapter, "example.com").await;
        let err = adapter
            .create(CreateRequest::new("domain", record! { "name" => "example.com" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Conflict { .. }));
        assert_eq!(adapter.len("domain").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_explicit_id_is_conflict() {
        let adapter = adapter();
        let data = record! { "id" => "sub-1", "isIdentified" => false };
        adapter
            .create(CreateRequest::new("subject", data.clone()))
            .await
            .unwrap();
        assert!(matches!(
            adapter.create(CreateRequest::new("subject", data)).await,
            Err(AdapterError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_reference_is_rejected() {
        let adapter = adapter();
        let err = adapter
            .create(CreateRequest::new(
                "consent",
                record! { "subjectId" => "sub_missing", "domainId" => "dom_missing" },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::ForeignKey { .. }));
    }

    #[tokio::test]
    async fn test_cascade_and_set_null() {
        let adapter = adapter();
        let subject_id = subject(&adapter).await;
        let domain_id = domain(&adapter, "example.com").await;
        let consent = adapter
            .create(CreateRequest::new(
                "consent",
                record! { "subjectId" => subject_id.as_str(), "domainId" => domain_id.as_str() },
            ))
            .await
            .unwrap();
        let consent_id = consent["id"].as_str().unwrap().to_string();
        adapter
            .create(CreateRequest::new(
                "auditLog",
                record! {
                    "entityType" => "consent",
                    "entityId" => consent_id.as_str(),
                    "actionType" => "create",
                    "subjectId" => subject_id.as_str(),
                },
            ))
            .await
            .unwrap();

        assert!(adapter.delete(Query::new("subject").eq("id", subject_id.as_str())).await.unwrap());

        assert_eq!(adapter.len("consent").unwrap(), 0);
        let log = adapter.find_one(Query::new("auditLog")).await.unwrap().unwrap();
        assert!(log["subjectId"].is_null());
    }

    #[tokio::test]
    async fn test_restrict_blocks_delete_without_partial_effects() {
        let adapter = adapter();
        let subject_id = subject(&adapter).await;
        let domain_id = domain(&adapter, "example.com").await;
        let policy = adapter
            .create(CreateRequest::new(
                "consentPolicy",
                record! {
                    "version" => "1.0.0",
                    "name" => "Privacy",
                    "type" => "privacy_policy",
                    "effectiveDate" => chrono::Utc::now(),
                    "content" => "...",
                    "contentHash" => "abc",
                },
            ))
            .await
            .unwrap();
        adapter
            .create(CreateRequest::new(
                "consent",
                record! {
                    "subjectId" => subject_id.as_str(),
                    "domainId" => domain_id.as_str(),
                    "policyId" => policy["id"].clone(),
                },
            ))
            .await
            .unwrap();

        let err = adapter
            .delete(Query::new("consentPolicy").eq("id", policy["id"].clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Restricted { .. }));
        assert_eq!(adapter.len("consentPolicy").unwrap(), 1);
        assert_eq!(adapter.len("consent").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_many_counts_rows() {
        let adapter = adapter();
        subject(&adapter).await;
        subject(&adapter).await;
        let count = adapter
            .update_many(
                UpdateRequest::new("subject", record! { "status" => "inactive" })
                    .eq("isIdentified", false),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
        let inactive = adapter
            .count(Query::new("subject").eq("status", "inactive"))
            .await
            .unwrap();
        assert_eq!(inactive, 2);
    }

    #[tokio::test]
    async fn test_commit_publishes_snapshot() {
        let adapter = adapter();
        let tx = adapter.begin().await.unwrap();
        tx.as_adapter()
            .create(CreateRequest::new("subject", record! { "id" => "sub-tx" }))
            .await
            .unwrap();
        assert_eq!(adapter.len("subject").unwrap(), 0);
        tx.commit().await.unwrap();
        assert_eq!(adapter.len("subject").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nested_begin_is_rejected() {
        let adapter = adapter();
        let tx = adapter.begin().await.unwrap();
        let nested = tx.as_adapter().begin().await;
        assert!(matches!(nested, Err(AdapterError::NestedTransaction)));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_sort_puts_nulls_first() {
        let adapter = adapter();
        adapter
            .create(CreateRequest::new("subject", record! { "externalId" => "b" }))
            .await
            .unwrap();
        adapter
            .create(CreateRequest::new("subject", record! {}))
            .await
            .unwrap();
        adapter
            .create(CreateRequest::new("subject", record! { "externalId" => "a" }))
            .await
            .unwrap();
        let rows = adapter
            .find_many(Query::new("subject").sort_by(SortBy::asc("externalId")))
            .await
            .unwrap();
        let ids: Vec<Value> = rows.iter().map(|r| r["externalId"].clone()).collect();
        assert_eq!(ids, vec![Value::Null, Value::from("a"), Value::from("b")]);
    }
}
