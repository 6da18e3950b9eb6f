//! Consent operations.
//!
//! Each write runs in one transaction: either the consent, its purpose
//! links, the consent record and the audit entry are all stored, or none
//! are.

use std::collections::BTreeMap;

use c15t_adapter::{Query, SortBy, UpdateRequest, transaction};
use c15t_schema::{
    AuditLog, Consent, ConsentGeoLocation, ConsentPolicy, ConsentPurposeJunction, ConsentRecord,
    ConsentWithdrawal, Domain, Entity, Subject, WriteAction, parse_input,
};
use c15t_types::{Record, Value, record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::c15t::C15t;
use crate::error::{C15tError, Result};
use crate::registry::{Registry, SubjectRef, put};

/// Junction and consent status values.
pub mod status {
    pub const ACTIVE: &str = "active";
    pub const WITHDRAWN: &str = "withdrawn";
    pub const SUPERSEDED: &str = "superseded";
}

/// Consent record and audit action types.
pub mod action {
    pub const CONSENT_GIVEN: &str = "consent_given";
    pub const CONSENT_WITHDRAWN: &str = "consent_withdrawn";
}

/// Input to [`C15t::set_consent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetConsentRequest {
    /// `None` records consent for a new anonymous subject.
    pub subject: Option<SubjectRef>,
    pub domain: String,
    /// Policy lineage, e.g. `cookie_banner` or `privacy_policy`.
    pub consent_type: String,
    /// Purpose code to granted flag.
    pub preferences: BTreeMap<String, bool>,
    /// Pins a specific policy instead of the active one for `consent_type`.
    pub policy_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub region: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Values for additional consent fields declared in the schema options.
    pub additional: Record,
}

/// Consent fields `set_consent` fills from the request itself.
const OWNED_CONSENT_FIELDS: &[&str] = &[
    "subjectId",
    "domainId",
    "policyId",
    "purposeIds",
    "preferences",
    "metadata",
    "ipAddress",
    "userAgent",
    "region",
    "status",
    "givenAt",
    "validUntil",
    "isActive",
];

impl SetConsentRequest {
    pub fn new(domain: impl Into<String>, consent_type: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            consent_type: consent_type.into(),
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject: SubjectRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn preference(mut self, code: impl Into<String>, granted: bool) -> Self {
        self.preferences.insert(code.into(), granted);
        self
    }

    pub fn policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    pub fn ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional.insert(name.into(), value.into());
        self
    }
}

/// Result of [`C15t::set_consent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConsentResponse {
    pub subject: Subject,
    pub domain: Domain,
    pub policy: ConsentPolicy,
    pub consent: Consent,
    pub record: ConsentRecord,
}

/// Input to [`C15t::verify_consent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyConsentRequest {
    pub subject: Option<SubjectRef>,
    pub domain: String,
    /// When set, the consent must have been given against this policy.
    pub policy_id: Option<String>,
    /// Purpose codes that must be granted.
    pub purposes: Vec<String>,
}

impl VerifyConsentRequest {
    pub fn new(subject: SubjectRef, domain: impl Into<String>) -> Self {
        Self {
            subject: Some(subject),
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn purpose(mut self, code: impl Into<String>) -> Self {
        self.purposes.push(code.into());
        self
    }

    pub fn policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

/// Why a consent failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    SubjectNotFound,
    DomainNotFound,
    NoActiveConsent,
    Expired,
    PolicyMismatch,
    PurposesNotGranted,
}

/// Result of [`C15t::verify_consent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConsentResponse {
    pub is_valid: bool,
    pub failure: Option<VerifyFailure>,
    pub consent: Option<Consent>,
    /// Requested purpose codes the consent does not grant.
    pub missing_purposes: Vec<String>,
}

impl VerifyConsentResponse {
    fn failed(failure: VerifyFailure, consent: Option<Consent>) -> Self {
        Self {
            is_valid: false,
            failure: Some(failure),
            consent,
            missing_purposes: Vec::new(),
        }
    }
}

/// Everything stored about a subject's consents, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentHistory {
    pub subject: Subject,
    pub consents: Vec<Consent>,
    pub records: Vec<ConsentRecord>,
    pub withdrawals: Vec<ConsentWithdrawal>,
    pub audit_logs: Vec<AuditLog>,
}

/// Input to [`C15t::withdraw_consent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawConsentRequest {
    pub consent_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// How the withdrawal arrived, e.g. `api`, `banner`, `email`.
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_method() -> String {
    "api".to_string()
}

impl WithdrawConsentRequest {
    pub fn new(consent_id: impl Into<String>) -> Self {
        Self {
            consent_id: consent_id.into(),
            reason: None,
            method: default_method(),
            ip_address: None,
            user_agent: None,
            metadata: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Result of [`C15t::withdraw_consent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawConsentResponse {
    pub consent: Consent,
    pub withdrawal: ConsentWithdrawal,
}

impl C15t {
    fn registry(&self) -> Registry<'_> {
        Registry::new(self.adapter.as_ref(), &self.hooks)
    }

    /// Validates the caller's additional consent fields.
    ///
    /// Required fields are checked by the adapter once the generated
    /// fields are merged in.
    fn additional_fields(&self, request: &SetConsentRequest) -> Result<Record> {
        if let Some(name) = request
            .additional
            .keys()
            .find(|name| OWNED_CONSENT_FIELDS.contains(&name.as_str()))
        {
            return Err(C15tError::InvalidRequest(format!(
                "{name} is set from the request, not as an additional field"
            )));
        }
        let table = self.tables.table(Consent::MODEL)?;
        Ok(parse_input(table, request.additional.clone(), WriteAction::Update)?)
    }

    /// Records a consent decision.
    ///
    /// Resolves (or creates) the subject, domain, policy and purposes,
    /// supersedes the subject's active consents for the domain and stores
    /// the new consent with one purpose link per preference.
    #[instrument(skip(self, request), fields(domain = %request.domain, consent_type = %request.consent_type))]
    pub async fn set_consent(&self, request: SetConsentRequest) -> Result<SetConsentResponse> {
        if request.domain.trim().is_empty() {
            return Err(C15tError::InvalidRequest("domain is required".to_string()));
        }
        if request.consent_type.trim().is_empty() {
            return Err(C15tError::InvalidRequest("consent type is required".to_string()));
        }
        let additional = self.additional_fields(&request)?;

        let registry = self.registry();
        if let Some(SubjectRef::Id(id)) = &request.subject {
            if registry.find_subject(&SubjectRef::Id(id.clone())).await?.is_none() {
                return Err(C15tError::not_found("subject", id.as_str()));
            }
        }
        let pinned_policy = match &request.policy_id {
            Some(id) => Some(
                registry
                    .find::<ConsentPolicy>(Query::new(ConsentPolicy::MODEL).eq("id", id.as_str()))
                    .await?
                    .ok_or_else(|| C15tError::not_found("consentPolicy", id.as_str()))?,
            ),
            None => None,
        };

        let hooks = self.hooks.as_ref();
        let request = &request;
        let response = transaction(self.adapter.as_ref(), move |tx| {
            Box::pin(async move {
                let registry = Registry::new(tx, hooks);
                let subject = registry
                    .find_or_create_subject(request.subject.as_ref(), request.ip_address.as_deref())
                    .await?;
                let domain = registry.find_or_create_domain(&request.domain).await?;
                let policy = match pinned_policy {
                    Some(policy) => policy,
                    None => registry.find_or_create_policy(&request.consent_type).await?,
                };
                let mut purposes = Vec::with_capacity(request.preferences.len());
                for (code, granted) in &request.preferences {
                    purposes.push((registry.find_or_create_purpose(code).await?, *granted));
                }

                let superseded = registry
                    .update_many(
                        UpdateRequest::new(
                            Consent::MODEL,
                            record! { "isActive" => false, "status" => status::SUPERSEDED },
                        )
                        .eq("subjectId", subject.id.as_str())
                        .eq("domainId", domain.id.as_str())
                        .eq("isActive", true),
                    )
                    .await?;
                if superseded > 0 {
                    debug!(subject_id = %subject.id, superseded, "previous consents superseded");
                }

                let preferences = serde_json::to_value(&request.preferences).unwrap_or_default();
                let mut data = record! {
                    "subjectId" => subject.id.as_str(),
                    "domainId" => domain.id.as_str(),
                    "policyId" => policy.id.as_str(),
                    "purposeIds" => purposes.iter().map(|(p, _)| p.id.clone()).collect::<Vec<_>>(),
                    "preferences" => preferences.clone(),
                    "givenAt" => Utc::now(),
                };
                put(&mut data, "metadata", request.metadata.clone());
                put(&mut data, "ipAddress", request.ip_address.as_deref());
                put(&mut data, "userAgent", request.user_agent.as_deref());
                put(&mut data, "region", request.region.as_deref());
                put(&mut data, "validUntil", request.valid_until);
                data.extend(additional);
                let consent = Consent::from_record(registry.create(Consent::MODEL, data).await?)?;

                for (purpose, granted) in &purposes {
                    let link_status = if *granted { status::ACTIVE } else { status::WITHDRAWN };
                    registry
                        .create(
                            ConsentPurposeJunction::MODEL,
                            record! {
                                "consentId" => consent.id.as_str(),
                                "purposeId" => purpose.id.as_str(),
                                "status" => link_status,
                            },
                        )
                        .await?;
                }

                if let Some(ip) = &request.ip_address {
                    let mut location = record! { "consentId" => consent.id.as_str(), "ip" => ip.as_str() };
                    put(&mut location, "region", request.region.as_deref());
                    registry.create(ConsentGeoLocation::MODEL, location).await?;
                }

                let record = ConsentRecord::from_record(
                    registry
                        .create(
                            ConsentRecord::MODEL,
                            record! {
                                "subjectId" => subject.id.as_str(),
                                "consentId" => consent.id.as_str(),
                                "actionType" => action::CONSENT_GIVEN,
                                "details" => json!({
                                    "consentType": request.consent_type,
                                    "policyVersion": policy.version,
                                    "preferences": preferences,
                                }),
                            },
                        )
                        .await?,
                )?;

                audit(
                    &registry,
                    &consent,
                    action::CONSENT_GIVEN,
                    request.ip_address.as_deref(),
                    request.user_agent.as_deref(),
                    json!({ "preferences": consent.preferences, "policyId": policy.id }),
                )
                .await?;

                Ok(SetConsentResponse {
                    subject,
                    domain,
                    policy,
                    consent,
                    record,
                })
            })
        })
        .await?;

        info!(
            subject_id = %response.subject.id,
            consent_id = %response.consent.id,
            purposes = response.consent.purpose_ids.len(),
            "consent set"
        );
        Ok(response)
    }

    /// The subject's newest active consent, optionally for one domain.
    ///
    /// Unknown subjects and domains yield `None`.
    #[instrument(skip(self))]
    pub async fn get_consent(&self, subject: &SubjectRef, domain: Option<&str>) -> Result<Option<Consent>> {
        let registry = self.registry();
        let Some(subject) = registry.find_subject(subject).await? else {
            return Ok(None);
        };
        let domain_id = match domain {
            Some(name) => match registry.find_domain(name).await? {
                Some(domain) => Some(domain.id),
                None => return Ok(None),
            },
            None => None,
        };
        let consents = registry
            .active_consents(&subject.id, domain_id.as_deref())
            .await?;
        Ok(consents.into_iter().next())
    }

    /// Checks that a subject holds a live consent granting every requested
    /// purpose.
    ///
    /// A consent is live while `isActive` is set and `validUntil`, when
    /// present, lies in the future.
    #[instrument(skip(self, request), fields(domain = %request.domain))]
    pub async fn verify_consent(&self, request: &VerifyConsentRequest) -> Result<VerifyConsentResponse> {
        let registry = self.registry();
        let subject = match &request.subject {
            Some(subject) => registry.find_subject(subject).await?,
            None => None,
        };
        let Some(subject) = subject else {
            return Ok(VerifyConsentResponse::failed(VerifyFailure::SubjectNotFound, None));
        };
        let Some(domain) = registry.find_domain(&request.domain).await? else {
            return Ok(VerifyConsentResponse::failed(VerifyFailure::DomainNotFound, None));
        };
        let Some(consent) = registry
            .active_consents(&subject.id, Some(&domain.id))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(VerifyConsentResponse::failed(VerifyFailure::NoActiveConsent, None));
        };

        if consent.valid_until.is_some_and(|until| until <= Utc::now()) {
            return Ok(VerifyConsentResponse::failed(VerifyFailure::Expired, Some(consent)));
        }
        if let Some(policy_id) = &request.policy_id {
            if consent.policy_id.as_ref() != Some(policy_id) {
                return Ok(VerifyConsentResponse::failed(
                    VerifyFailure::PolicyMismatch,
                    Some(consent),
                ));
            }
        }

        let missing_purposes: Vec<String> = request
            .purposes
            .iter()
            .filter(|code| consent.preference(code) != Some(true))
            .cloned()
            .collect();
        let is_valid = missing_purposes.is_empty();
        debug!(consent_id = %consent.id, is_valid, missing = missing_purposes.len(), "consent verified");

        Ok(VerifyConsentResponse {
            is_valid,
            failure: (!is_valid).then_some(VerifyFailure::PurposesNotGranted),
            consent: Some(consent),
            missing_purposes,
        })
    }

    /// Every consent, consent record, withdrawal and audit entry for a
    /// subject.
    #[instrument(skip(self))]
    pub async fn consent_history(&self, subject: &SubjectRef) -> Result<ConsentHistory> {
        let registry = self.registry();
        let subject = registry
            .find_subject(subject)
            .await?
            .ok_or_else(|| C15tError::not_found("subject", subject.value()))?;
        let id = subject.id.as_str();

        let consents = registry
            .find_all(
                Query::new(Consent::MODEL)
                    .eq("subjectId", id)
                    .sort_by(SortBy::desc("givenAt")),
            )
            .await?;
        let records = registry
            .find_all(
                Query::new(ConsentRecord::MODEL)
                    .eq("subjectId", id)
                    .sort_by(SortBy::desc("createdAt")),
            )
            .await?;
        let withdrawals = registry
            .find_all(
                Query::new(ConsentWithdrawal::MODEL)
                    .eq("subjectId", id)
                    .sort_by(SortBy::desc("createdAt")),
            )
            .await?;
        let audit_logs = registry
            .find_all(
                Query::new(AuditLog::MODEL)
                    .eq("subjectId", id)
                    .sort_by(SortBy::desc("createdAt")),
            )
            .await?;

        Ok(ConsentHistory {
            subject,
            consents,
            records,
            withdrawals,
            audit_logs,
        })
    }

    /// Withdraws an active consent and its purpose links.
    #[instrument(skip(self, request), fields(consent_id = %request.consent_id))]
    pub async fn withdraw_consent(&self, request: WithdrawConsentRequest) -> Result<WithdrawConsentResponse> {
        let registry = self.registry();
        let consent: Consent = registry
            .find(Query::new(Consent::MODEL).eq("id", request.consent_id.as_str()))
            .await?
            .ok_or_else(|| C15tError::not_found("consent", request.consent_id.as_str()))?;
        if !consent.is_active {
            return Err(C15tError::InvalidRequest(format!(
                "consent {} is not active",
                consent.id
            )));
        }

        let hooks = self.hooks.as_ref();
        let request = &request;
        let response = transaction(self.adapter.as_ref(), move |tx| {
            Box::pin(async move {
                let registry = Registry::new(tx, hooks);

                let mut update = record! { "isActive" => false, "status" => status::WITHDRAWN };
                put(&mut update, "withdrawalReason", request.reason.as_deref());
                let updated = registry
                    .update(UpdateRequest::new(Consent::MODEL, update).eq("id", consent.id.as_str()))
                    .await?;
                let updated = Consent::from_record(updated)?;

                registry
                    .update_many(
                        UpdateRequest::new(
                            ConsentPurposeJunction::MODEL,
                            record! { "status" => status::WITHDRAWN },
                        )
                        .eq("consentId", consent.id.as_str()),
                    )
                    .await?;

                let mut data = record! {
                    "consentId" => consent.id.as_str(),
                    "subjectId" => consent.subject_id.as_str(),
                    "withdrawalMethod" => request.method.as_str(),
                };
                put(&mut data, "withdrawalReason", request.reason.as_deref());
                put(&mut data, "metadata", request.metadata.clone());
                let withdrawal =
                    ConsentWithdrawal::from_record(registry.create(ConsentWithdrawal::MODEL, data).await?)?;

                registry
                    .create(
                        ConsentRecord::MODEL,
                        record! {
                            "subjectId" => consent.subject_id.as_str(),
                            "consentId" => consent.id.as_str(),
                            "actionType" => action::CONSENT_WITHDRAWN,
                            "details" => json!({
                                "reason": request.reason,
                                "method": request.method,
                            }),
                        },
                    )
                    .await?;

                audit(
                    &registry,
                    &updated,
                    action::CONSENT_WITHDRAWN,
                    request.ip_address.as_deref(),
                    request.user_agent.as_deref(),
                    json!({ "isActive": false, "status": status::WITHDRAWN }),
                )
                .await?;

                Ok(WithdrawConsentResponse {
                    consent: updated,
                    withdrawal,
                })
            })
        })
        .await?;

        info!(
            subject_id = %response.consent.subject_id,
            consent_id = %response.consent.id,
            method = %response.withdrawal.withdrawal_method,
            "consent withdrawn"
        );
        Ok(response)
    }
}

async fn audit(
    registry: &Registry<'_>,
    consent: &Consent,
    action_type: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    changes: serde_json::Value,
) -> c15t_adapter::Result<Record> {
    let mut entry = record! {
        "entityType" => Consent::MODEL,
        "entityId" => consent.id.as_str(),
        "actionType" => action_type,
        "subjectId" => consent.subject_id.as_str(),
        "changes" => changes,
    };
    put(&mut entry, "ipAddress", ip_address);
    put(&mut entry, "userAgent", user_agent);
    registry.create(AuditLog::MODEL, entry).await
}
