//! Lookup-or-create helpers shared by the consent operations.
//!
//! Every write goes through the hook pipeline. An aborted write becomes
//! [`AdapterError::Aborted`] so the surrounding transaction rolls back.
//! Records leave the registry without their hidden fields.

use c15t_adapter::hooks::{HookRegistry, create_with_hooks, update_many_with_hooks, update_with_hooks};
use c15t_adapter::{Adapter, AdapterError, CreateRequest, Query, Result, SortBy, UpdateRequest};
use c15t_schema::{Consent, ConsentPolicy, ConsentPurpose, Domain, Entity, Subject, parse_output};
use c15t_types::{Record, Value, record};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// How a caller identifies a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectRef {
    /// The subject's primary key.
    Id(String),
    /// The host application's identifier for the visitor.
    ExternalId(String),
}

impl SubjectRef {
    pub fn value(&self) -> &str {
        match self {
            SubjectRef::Id(id) | SubjectRef::ExternalId(id) => id,
        }
    }
}

/// Sets `field` when `value` is present.
pub(crate) fn put(record: &mut Record, field: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        record.insert(field.to_string(), value.into());
    }
}

/// SHA-256 of policy content, hex encoded.
pub(crate) fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub(crate) struct Registry<'a> {
    adapter: &'a dyn Adapter,
    hooks: &'a HookRegistry,
}

impl<'a> Registry<'a> {
    pub(crate) fn new(adapter: &'a dyn Adapter, hooks: &'a HookRegistry) -> Self {
        Self { adapter, hooks }
    }

    /// Drops fields the schema marks as not returned.
    fn output(&self, model: &str, record: Record) -> Result<Record> {
        Ok(parse_output(self.hooks.tables().table(model)?, record))
    }

    pub(crate) async fn create(&self, model: &str, data: Record) -> Result<Record> {
        let created = create_with_hooks(self.adapter, self.hooks, CreateRequest::new(model, data))
            .await?
            .ok_or_else(|| aborted(model))?;
        self.output(model, created)
    }

    pub(crate) async fn update(&self, request: UpdateRequest) -> Result<Record> {
        let model = request.model.clone();
        let updated = update_with_hooks(self.adapter, self.hooks, request)
            .await?
            .ok_or_else(|| aborted(&model))?;
        self.output(&model, updated)
    }

    pub(crate) async fn update_many(&self, request: UpdateRequest) -> Result<u64> {
        let model = request.model.clone();
        update_many_with_hooks(self.adapter, self.hooks, request)
            .await?
            .ok_or_else(|| aborted(&model))
    }

    pub(crate) async fn find<E: Entity>(&self, query: Query) -> Result<Option<E>> {
        match self.adapter.find_one(query).await? {
            Some(record) => Ok(Some(E::from_record(self.output(E::MODEL, record)?)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn find_all<E: Entity>(&self, query: Query) -> Result<Vec<E>> {
        self.adapter
            .find_many(query)
            .await?
            .into_iter()
            .map(|record| -> Result<E> { Ok(E::from_record(self.output(E::MODEL, record)?)?) })
            .collect()
    }

    pub(crate) async fn find_subject(&self, subject: &SubjectRef) -> Result<Option<Subject>> {
        let query = match subject {
            SubjectRef::Id(id) => Query::new(Subject::MODEL).eq("id", id.as_str()),
            SubjectRef::ExternalId(id) => Query::new(Subject::MODEL).eq("externalId", id.as_str()),
        };
        self.find(query).await
    }

    /// Resolves the subject for a new consent.
    ///
    /// An unknown external id creates an identified subject; no reference
    /// creates an anonymous one. A known subject seen from a new address
    /// gets its `lastIpAddress` refreshed.
    pub(crate) async fn find_or_create_subject(
        &self,
        subject: Option<&SubjectRef>,
        ip_address: Option<&str>,
    ) -> Result<Subject> {
        if let Some(subject) = subject {
            if let Some(found) = self.find_subject(subject).await? {
                return match ip_address {
                    Some(ip) if found.last_ip_address.as_deref() != Some(ip) => {
                        let updated = self
                            .update(
                                UpdateRequest::new(Subject::MODEL, record! { "lastIpAddress" => ip })
                                    .eq("id", found.id.as_str()),
                            )
                            .await?;
                        Ok(Subject::from_record(updated)?)
                    }
                    _ => Ok(found),
                };
            }
        }
        let mut data = match subject {
            Some(SubjectRef::ExternalId(external_id)) => {
                record! { "isIdentified" => true, "externalId" => external_id.as_str() }
            }
            _ => record! { "isIdentified" => false },
        };
        put(&mut data, "lastIpAddress", ip_address);
        let created = Subject::from_record(self.create(Subject::MODEL, data).await?)?;
        debug!(subject_id = %created.id, identified = created.is_identified, "subject created");
        Ok(created)
    }

    pub(crate) async fn find_domain(&self, name: &str) -> Result<Option<Domain>> {
        self.find(Query::new(Domain::MODEL).eq("name", name)).await
    }

    pub(crate) async fn find_or_create_domain(&self, name: &str) -> Result<Domain> {
        if let Some(domain) = self.find_domain(name).await? {
            return Ok(domain);
        }
        let created = self
            .create(
                Domain::MODEL,
                record! {
                    "name" => name,
                    "description" => format!("Auto-created domain for {name}"),
                },
            )
            .await?;
        Ok(Domain::from_record(created)?)
    }

    pub(crate) async fn find_or_create_purpose(&self, code: &str) -> Result<ConsentPurpose> {
        if let Some(purpose) = self
            .find(Query::new(ConsentPurpose::MODEL).eq("code", code))
            .await?
        {
            return Ok(purpose);
        }
        let created = self
            .create(
                ConsentPurpose::MODEL,
                record! {
                    "code" => code,
                    "name" => code,
                    "description" => format!("Auto-created purpose for {code}"),
                },
            )
            .await?;
        Ok(ConsentPurpose::from_record(created)?)
    }

    /// Most recent active policy of `policy_type`.
    pub(crate) async fn active_policy(&self, policy_type: &str) -> Result<Option<ConsentPolicy>> {
        let mut policies = self
            .find_all(
                Query::new(ConsentPolicy::MODEL)
                    .eq("type", policy_type)
                    .eq("isActive", true)
                    .sort_by(SortBy::desc("effectiveDate"))
                    .limit(1),
            )
            .await?;
        Ok(policies.pop())
    }

    /// The active policy of `policy_type`, creating a placeholder `1.0.0`
    /// when none exists.
    pub(crate) async fn find_or_create_policy(&self, policy_type: &str) -> Result<ConsentPolicy> {
        if let Some(policy) = self.active_policy(policy_type).await? {
            return Ok(policy);
        }
        let content = format!("Default {policy_type} policy");
        let created = self
            .create(
                ConsentPolicy::MODEL,
                record! {
                    "version" => "1.0.0",
                    "name" => content.as_str(),
                    "type" => policy_type,
                    "effectiveDate" => Utc::now(),
                    "contentHash" => content_hash(&content),
                    "content" => content,
                },
            )
            .await?;
        Ok(ConsentPolicy::from_record(created)?)
    }

    /// Active consents of a subject, newest first.
    pub(crate) async fn active_consents(
        &self,
        subject_id: &str,
        domain_id: Option<&str>,
    ) -> Result<Vec<Consent>> {
        let mut query = Query::new(Consent::MODEL)
            .eq("subjectId", subject_id)
            .eq("isActive", true)
            .sort_by(SortBy::desc("givenAt"));
        if let Some(domain_id) = domain_id {
            query = query.eq("domainId", domain_id);
        }
        self.find_all(query).await
    }
}

fn aborted(model: &str) -> AdapterError {
    AdapterError::Aborted {
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use c15t_adapter::MemoryAdapter;
    use c15t_adapter::hooks::{HookAction, HookOperation};
    use c15t_schema::{SchemaOptions, get_consent_tables};

    use super::*;

    fn setup() -> (MemoryAdapter, HookRegistry) {
        let tables = Arc::new(get_consent_tables(&SchemaOptions::default()).unwrap());
        (
            MemoryAdapter::new(Arc::clone(&tables)),
            HookRegistry::new(tables),
        )
    }

    #[tokio::test]
    async fn test_find_or_create_is_stable() {
        let (adapter, hooks) = setup();
        let registry = Registry::new(&adapter, &hooks);

        let first = registry.find_or_create_domain("example.com").await.unwrap();
        let second = registry.find_or_create_domain("example.com").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.allowed_origins.is_empty());

        let purpose = registry.find_or_create_purpose("analytics").await.unwrap();
        assert_eq!(purpose.name, "analytics");
        assert!(!purpose.is_essential);
    }

    #[tokio::test]
    async fn test_default_policy_hash() {
        let (adapter, hooks) = setup();
        let registry = Registry::new(&adapter, &hooks);

        let policy = registry.find_or_create_policy("cookie_banner").await.unwrap();
        assert_eq!(policy.version, "1.0.0");
        assert_eq!(policy.content_hash, content_hash(&policy.content));
        assert_eq!(
            registry.find_or_create_policy("cookie_banner").await.unwrap().id,
            policy.id
        );
    }

    #[tokio::test]
    async fn test_subject_resolution() {
        let (adapter, hooks) = setup();
        let registry = Registry::new(&adapter, &hooks);

        let anonymous = registry.find_or_create_subject(None, Some("10.0.0.1")).await.unwrap();
        assert!(!anonymous.is_identified);
        assert_eq!(anonymous.last_ip_address.as_deref(), Some("10.0.0.1"));

        let external = SubjectRef::ExternalId("user-42".into());
        let identified = registry.find_or_create_subject(Some(&external), None).await.unwrap();
        assert!(identified.is_identified);
        let again = registry.find_or_create_subject(Some(&external), None).await.unwrap();
        assert_eq!(again.id, identified.id);

        let moved = registry
            .find_or_create_subject(Some(&external), Some("10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(moved.id, identified.id);
        assert_eq!(moved.last_ip_address.as_deref(), Some("10.0.0.2"));
        let unchanged = registry.find_or_create_subject(Some(&external), None).await.unwrap();
        assert_eq!(unchanged.last_ip_address.as_deref(), Some("10.0.0.2"));

        let by_id = registry
            .find_subject(&SubjectRef::Id(identified.id.clone()))
            .await
            .unwrap();
        assert_eq!(by_id.map(|s| s.external_id), Some(Some("user-42".to_string())));
    }

    #[tokio::test]
    async fn test_abort_becomes_error() {
        let (adapter, mut hooks) = setup();
        hooks
            .before_fn("domain", HookOperation::Create, |_, _| Ok(HookAction::Abort))
            .unwrap();
        let registry = Registry::new(&adapter, &hooks);

        let err = registry.find_or_create_domain("blocked.example").await.unwrap_err();
        assert!(matches!(err, AdapterError::Aborted { model } if model == "domain"));
    }
}
