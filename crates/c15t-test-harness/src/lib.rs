//! Test harness for c15t adapters.
//!
//! [`run_adapter_tests`] is the conformance suite every [`Adapter`]
//! implementation must pass. It expects the consent tables to exist and be
//! empty. [`TempSqlite`] hands out a file-backed SQLite database that is
//! removed on drop.
//!
//! ```no_run
//! # async fn demo() -> Result<(), c15t_test_harness::HarnessError> {
//! use std::sync::Arc;
//! use c15t_adapter::MemoryAdapter;
//! use c15t_schema::{SchemaOptions, get_consent_tables};
//!
//! let tables = Arc::new(get_consent_tables(&SchemaOptions::default())?);
//! c15t_test_harness::run_adapter_tests(&MemoryAdapter::new(tables)).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use c15t_adapter::{
    Adapter, AdapterError, CreateRequest, Query, SortBy, UpdateRequest, Where, transaction,
};
use c15t_schema::SchemaError;
use c15t_types::{Record, Value, record};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// A conformance check failure.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("{check}: adapter error: {source}")]
    Adapter {
        check: &'static str,
        #[source]
        source: AdapterError,
    },

    #[error("{check}: {detail}")]
    Failed { check: &'static str, detail: String },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

macro_rules! ensure {
    ($check:expr, $cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(HarnessError::Failed {
                check: $check,
                detail: format!($($arg)+),
            });
        }
    };
}

trait CheckExt<T> {
    fn check(self, check: &'static str) -> Result<T>;
}

impl<T> CheckExt<T> for std::result::Result<T, AdapterError> {
    fn check(self, check: &'static str) -> Result<T> {
        self.map_err(|source| HarnessError::Adapter { check, source })
    }
}

/// Runs every conformance check against `adapter`.
pub async fn run_adapter_tests(adapter: &dyn Adapter) -> Result<()> {
    round_trip(adapter).await?;
    explicit_id(adapter).await?;
    update_idempotence(adapter).await?;
    delete_visibility(adapter).await?;
    count(adapter).await?;
    paging_and_sorting(adapter).await?;
    in_and_or_filters(adapter).await?;
    pattern_filters(adapter).await?;
    transaction_rollback(adapter).await?;
    transaction_commit(adapter).await?;
    nested_transaction(adapter).await?;
    unknown_model(adapter).await?;
    debug!(adapter = adapter.id(), "adapter conformance suite passed");
    Ok(())
}

fn id_of(record: &Record) -> String {
    record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

async fn round_trip(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "round_trip";
    let created = adapter
        .create(CreateRequest::new(
            "subject",
            record! { "isIdentified" => false, "externalId" => "harness-round-trip" },
        ))
        .await
        .check(CHECK)?;
    let id = id_of(&created);
    ensure!(CHECK, !id.is_empty(), "created row has no id: {created:?}");

    let found = adapter
        .find_one(Query::new("subject").eq("id", id.as_str()))
        .await
        .check(CHECK)?;
    let Some(found) = found else {
        return Err(HarnessError::Failed {
            check: CHECK,
            detail: format!("row {id} not found after create"),
        });
    };
    ensure!(
        CHECK,
        found.get("isIdentified") == Some(&Value::Bool(false)),
        "isIdentified round-tripped as {:?}",
        found.get("isIdentified")
    );
    ensure!(
        CHECK,
        found.get("createdAt").and_then(Value::as_date).is_some(),
        "createdAt missing or not a date: {:?}",
        found.get("createdAt")
    );
    ensure!(CHECK, found == created, "find_one returned {found:?}, create returned {created:?}");
    Ok(())
}

async fn explicit_id(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "explicit_id";
    let created = adapter
        .create(CreateRequest::new(
            "subject",
            record! { "id" => "sub-1", "isIdentified" => false },
        ))
        .await
        .check(CHECK)?;
    ensure!(CHECK, id_of(&created) == "sub-1", "explicit id replaced: {created:?}");
    let found = adapter
        .find_one(Query::new("subject").eq("id", "sub-1"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, found.is_some(), "sub-1 not found");
    Ok(())
}

async fn update_idempotence(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "update_idempotence";
    let created = adapter
        .create(CreateRequest::new("subject", record! { "isIdentified" => false }))
        .await
        .check(CHECK)?;
    let id = id_of(&created);

    for attempt in 0..2 {
        let updated = adapter
            .update(
                UpdateRequest::new("subject", record! { "isIdentified" => true })
                    .eq("id", id.as_str()),
            )
            .await
            .check(CHECK)?;
        let flag = updated.as_ref().and_then(|r| r.get("isIdentified")).cloned();
        ensure!(
            CHECK,
            flag == Some(Value::Bool(true)),
            "update #{attempt} returned isIdentified {flag:?}"
        );
    }

    let found = adapter
        .find_one(Query::new("subject").eq("id", id.as_str()))
        .await
        .check(CHECK)?;
    let flag = found.as_ref().and_then(|r| r.get("isIdentified")).cloned();
    ensure!(CHECK, flag == Some(Value::Bool(true)), "stored isIdentified is {flag:?}");

    let missing = adapter
        .update(UpdateRequest::new("subject", record! { "isIdentified" => true }).eq("id", "sub-missing"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, missing.is_none(), "update of a missing row returned {missing:?}");
    Ok(())
}

async fn delete_visibility(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "delete_visibility";
    let created = adapter
        .create(CreateRequest::new("subject", record! { "isIdentified" => false }))
        .await
        .check(CHECK)?;
    let id = id_of(&created);

    let deleted = adapter
        .delete(Query::new("subject").eq("id", id.as_str()))
        .await
        .check(CHECK)?;
    ensure!(CHECK, deleted, "delete reported nothing removed");

    let found = adapter
        .find_one(Query::new("subject").eq("id", id.as_str()))
        .await
        .check(CHECK)?;
    ensure!(CHECK, found.is_none(), "row still visible after delete");

    let again = adapter
        .delete(Query::new("subject").eq("id", id.as_str()))
        .await
        .check(CHECK)?;
    ensure!(CHECK, !again, "second delete reported a removal");
    Ok(())
}

async fn count(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "count";
    for _ in 0..3 {
        adapter
            .create(CreateRequest::new(
                "subject",
                record! { "isIdentified" => false, "identityProvider" => "harness-count" },
            ))
            .await
            .check(CHECK)?;
    }
    let total = adapter
        .count(Query::new("subject").eq("identityProvider", "harness-count"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, total == 3, "expected 3 rows, counted {total}");

    let removed = adapter
        .delete_many(Query::new("subject").eq("identityProvider", "harness-count"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, removed == 3, "delete_many removed {removed}");
    Ok(())
}

async fn paging_and_sorting(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "paging_and_sorting";
    for code in ["harness-p-3", "harness-p-0", "harness-p-4", "harness-p-1", "harness-p-2"] {
        adapter
            .create(CreateRequest::new(
                "consentPurpose",
                record! { "code" => code, "name" => code },
            ))
            .await
            .check(CHECK)?;
    }
    let prefix = || Where::new("code", c15t_adapter::Operator::StartsWith, "harness-p-");

    let page = adapter
        .find_many(
            Query::new("consentPurpose")
                .filter(prefix())
                .sort_by(SortBy::asc("code"))
                .limit(2)
                .offset(1),
        )
        .await
        .check(CHECK)?;
    let codes: Vec<_> = page.iter().filter_map(|r| r.get("code").and_then(Value::as_str)).collect();
    ensure!(CHECK, codes == ["harness-p-1", "harness-p-2"], "ascending page was {codes:?}");

    let first = adapter
        .find_one(
            Query::new("consentPurpose")
                .filter(prefix())
                .sort_by(SortBy::desc("code")),
        )
        .await
        .check(CHECK)?;
    let code = first.as_ref().and_then(|r| r.get("code")).cloned();
    ensure!(CHECK, code == Some(Value::from("harness-p-4")), "descending first was {code:?}");

    let projected = adapter
        .find_many(Query::new("consentPurpose").filter(prefix()).select(["code"]))
        .await
        .check(CHECK)?;
    ensure!(
        CHECK,
        projected.len() == 5 && projected.iter().all(|r| !r.contains_key("name")),
        "select projection returned {projected:?}"
    );
    Ok(())
}

async fn in_and_or_filters(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "in_and_or_filters";
    for (external_id, provider) in [
        ("harness-in-a", "harness-or"),
        ("harness-in-b", "harness-or"),
        ("harness-in-c", "harness-other"),
    ] {
        adapter
            .create(CreateRequest::new(
                "subject",
                record! {
                    "isIdentified" => true,
                    "externalId" => external_id,
                    "identityProvider" => provider,
                },
            ))
            .await
            .check(CHECK)?;
    }

    let listed = adapter
        .count(Query::new("subject").filter(Where::is_in("externalId", vec!["harness-in-a", "harness-in-c"])))
        .await
        .check(CHECK)?;
    ensure!(CHECK, listed == 2, "`in` matched {listed} rows");

    let either = adapter
        .count(
            Query::new("subject")
                .filter(Where::eq("externalId", "harness-in-a").or())
                .filter(Where::eq("externalId", "harness-in-c").or()),
        )
        .await
        .check(CHECK)?;
    ensure!(CHECK, either == 2, "OR matched {either} rows");

    let mixed = adapter
        .count(
            Query::new("subject")
                .eq("identityProvider", "harness-or")
                .filter(Where::eq("externalId", "harness-in-a").or())
                .filter(Where::eq("externalId", "harness-in-c").or()),
        )
        .await
        .check(CHECK)?;
    ensure!(CHECK, mixed == 1, "AND with OR matched {mixed} rows");

    let rejected = adapter
        .count(Query::new("subject").filter(Where::is_in("externalId", "harness-in-a")))
        .await;
    ensure!(
        CHECK,
        matches!(rejected, Err(AdapterError::InvalidWhere { .. })),
        "`in` with a scalar returned {rejected:?}"
    );
    Ok(())
}

async fn pattern_filters(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "pattern_filters";
    for (code, name, zones) in [
        ("DE", "Harness Germany", vec!["gdpr_eu"]),
        ("FR", "Harness France", vec!["gdpr"]),
        ("US", "Harness United States", vec!["ccpa"]),
    ] {
        adapter
            .create(CreateRequest::new(
                "geoLocation",
                record! { "countryCode" => code, "countryName" => name, "regulatoryZones" => zones },
            ))
            .await
            .check(CHECK)?;
    }
    let matching = |operator, value: &str| {
        Query::new("geoLocation")
            .filter(Where::new("countryName", c15t_adapter::Operator::StartsWith, "harness "))
            .filter(Where::new("countryCode", operator, value))
    };

    let lower = adapter
        .count(matching(c15t_adapter::Operator::Contains, "de"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, lower == 1, "`contains` ignoring case matched {lower} rows");

    let suffix = adapter
        .count(matching(c15t_adapter::Operator::EndsWith, "s"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, suffix == 1, "`ends_with` matched {suffix} rows");

    let literal = adapter
        .count(matching(c15t_adapter::Operator::Contains, "%"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, literal == 0, "`%` was treated as a wildcard ({literal} rows)");

    let on_array = adapter
        .count(Query::new("geoLocation").filter(Where::new(
            "regulatoryZones",
            c15t_adapter::Operator::Contains,
            "gdpr",
        )))
        .await;
    ensure!(
        CHECK,
        matches!(on_array, Err(AdapterError::InvalidWhere { .. })),
        "`contains` on a string array returned {on_array:?}"
    );
    Ok(())
}

async fn transaction_rollback(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "transaction_rollback";
    let result: std::result::Result<(), AdapterError> = transaction(adapter, |tx| {
        Box::pin(async move {
            tx.create(CreateRequest::new(
                "subject",
                record! { "isIdentified" => false, "externalId" => "harness-tx-rollback" },
            ))
            .await?;
            Err(AdapterError::Hook {
                model: "subject".to_string(),
                source: "abandon transaction".into(),
            })
        })
    })
    .await;
    ensure!(CHECK, result.is_err(), "failing transaction body reported success");

    let found = adapter
        .find_one(Query::new("subject").eq("externalId", "harness-tx-rollback"))
        .await
        .check(CHECK)?;
    ensure!(CHECK, found.is_none(), "rolled back row is visible: {found:?}");
    Ok(())
}

async fn transaction_commit(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "transaction_commit";
    let id = transaction(adapter, |tx| {
        Box::pin(async move {
            let subject = tx
                .create(CreateRequest::new(
                    "subject",
                    record! { "isIdentified" => false, "externalId" => "harness-tx-commit" },
                ))
                .await?;
            let seen = tx
                .count(Query::new("subject").eq("externalId", "harness-tx-commit"))
                .await?;
            Ok((id_of(&subject), seen))
        })
    })
    .await
    .check(CHECK)?;
    ensure!(CHECK, id.1 == 1, "transaction could not read its own write");

    let found = adapter
        .find_one(Query::new("subject").eq("id", id.0.as_str()))
        .await
        .check(CHECK)?;
    ensure!(CHECK, found.is_some(), "committed row is not visible");
    Ok(())
}

async fn nested_transaction(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "nested_transaction";
    let nested = transaction(adapter, |tx| {
        Box::pin(async move { Ok(tx.begin().await.map(|_| ())) })
    })
    .await
    .check(CHECK)?;
    ensure!(
        CHECK,
        matches!(nested, Err(AdapterError::NestedTransaction)),
        "expected NestedTransaction, got {nested:?}"
    );
    Ok(())
}

async fn unknown_model(adapter: &dyn Adapter) -> Result<()> {
    const CHECK: &str = "unknown_model";
    let result = adapter.find_one(Query::new("user")).await;
    ensure!(
        CHECK,
        matches!(result, Err(AdapterError::UnknownModel(ref model)) if model == "user"),
        "expected UnknownModel, got {result:?}"
    );
    Ok(())
}

/// A file-backed SQLite database in a temporary directory.
#[derive(Debug)]
pub struct TempSqlite {
    dir: TempDir,
    path: PathBuf,
}

impl TempSqlite {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c15t.db");
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the database, usable for other scratch files.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Connection URL that creates the file on first connect.
    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}
