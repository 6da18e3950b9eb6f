//! Typed entity structs.
//!
//! One struct per built-in model. Adapters speak [`Record`]; these structs
//! are the typed view used by the facade and by host applications.

use std::collections::BTreeMap;

use c15t_types::{Record, Value};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// A typed row of a built-in model.
pub trait Entity: Serialize + DeserializeOwned {
    /// Model key in the table map.
    const MODEL: &'static str;

    /// Converts an adapter record into the typed entity.
    fn from_record(record: Record) -> Result<Self> {
        let object = record
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::from_value(serde_json::Value::Object(object)).map_err(|source| {
            SchemaError::Entity {
                model: Self::MODEL,
                source,
            }
        })
    }

    /// Converts the entity into a record. `None` fields are omitted.
    ///
    /// Dates are emitted as text; adapters coerce them using the schema.
    fn to_record(&self) -> Result<Record> {
        let json = serde_json::to_value(self).map_err(|source| SchemaError::Entity {
            model: Self::MODEL,
            source,
        })?;
        match json {
            serde_json::Value::Object(object) => Ok(object
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| (name, Value::from(value)))
                .collect()),
            _ => Ok(Record::new()),
        }
    }
}

macro_rules! entity {
    ($ty:ident, $model:literal) => {
        impl Entity for $ty {
            const MODEL: &'static str = $model;
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub is_identified: bool,
    pub external_id: Option<String>,
    pub identity_provider: Option<String>,
    pub last_ip_address: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
entity!(Subject, "subject");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPurpose {
    pub id: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_essential: bool,
    pub data_category: Option<String>,
    pub legal_basis: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
entity!(ConsentPurpose, "consentPurpose");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
entity!(Domain, "domain");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub id: String,
    pub country_code: String,
    pub country_name: String,
    pub region_code: Option<String>,
    pub region_name: Option<String>,
    #[serde(default)]
    pub regulatory_zones: Vec<String>,
    pub created_at: DateTime<Utc>,
}
entity!(GeoLocation, "geoLocation");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPolicy {
    pub id: String,
    pub version: String,
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    pub effective_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub content: String,
    pub content_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
entity!(ConsentPolicy, "consentPolicy");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub id: String,
    pub subject_id: String,
    pub domain_id: String,
    pub policy_id: Option<String>,
    #[serde(default)]
    pub purpose_ids: Vec<String>,
    /// Purpose code to granted flag.
    pub preferences: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub region: Option<String>,
    pub status: String,
    pub withdrawal_reason: Option<String>,
    pub given_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Values of additional fields declared in the schema options.
    #[serde(flatten)]
    pub additional: BTreeMap<String, serde_json::Value>,
}
entity!(Consent, "consent");

impl Consent {
    /// Granted flag for a purpose code, if the preferences mention it.
    pub fn preference(&self, code: &str) -> Option<bool> {
        self.preferences
            .as_ref()
            .and_then(|prefs| prefs.get(code))
            .and_then(serde_json::Value::as_bool)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPurposeJunction {
    pub id: String,
    pub consent_id: String,
    pub purpose_id: String,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
entity!(ConsentPurposeJunction, "consentPurposeJunction");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: String,
    pub subject_id: String,
    pub consent_id: Option<String>,
    pub action_type: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
entity!(ConsentRecord, "consentRecord");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentGeoLocation {
    pub id: String,
    pub consent_id: String,
    pub ip: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}
entity!(ConsentGeoLocation, "consentGeoLocation");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentWithdrawal {
    pub id: String,
    pub consent_id: String,
    pub subject_id: String,
    pub withdrawal_reason: Option<String>,
    pub withdrawal_method: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
entity!(ConsentWithdrawal, "consentWithdrawal");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action_type: String,
    pub subject_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
entity!(AuditLog, "auditLog");

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_types::record;
    use chrono::TimeZone;

    #[test]
    fn test_subject_from_record() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let subject = Subject::from_record(record! {
            "id" => "sub_1",
            "isIdentified" => false,
            "externalId" => Option::<String>::None,
            "createdAt" => at,
            "updatedAt" => at,
        })
        .unwrap();
        assert_eq!(subject.id, "sub_1");
        assert!(!subject.is_identified);
        assert_eq!(subject.external_id, None);
        assert_eq!(subject.created_at, at);
    }

    #[test]
    fn test_to_record_omits_none() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let subject = Subject {
            id: "sub_1".to_string(),
            is_identified: true,
            external_id: Some("u-1".to_string()),
            identity_provider: None,
            last_ip_address: None,
            status: None,
            created_at: at,
            updated_at: at,
        };
        let record = subject.to_record().unwrap();
        assert_eq!(record["externalId"], Value::from("u-1"));
        assert!(!record.contains_key("identityProvider"));
        assert!(matches!(record["createdAt"], Value::String(_)));
    }

    #[test]
    fn test_missing_required_field_is_an_entity_error() {
        let err = Domain::from_record(record! { "id" => "dom_1" }).unwrap_err();
        assert!(matches!(err, SchemaError::Entity { model: "domain", .. }));
    }

    #[test]
    fn test_consent_preference_lookup() {
        let at = Utc::now();
        let consent = Consent::from_record(record! {
            "id" => "cns_1",
            "subjectId" => "sub_1",
            "domainId" => "dom_1",
            "preferences" => serde_json::json!({"marketing": true, "analytics": false}),
            "status" => "active",
            "givenAt" => at,
            "isActive" => true,
            "createdAt" => at,
            "updatedAt" => at,
        })
        .unwrap();
        assert_eq!(consent.preference("marketing"), Some(true));
        assert_eq!(consent.preference("analytics"), Some(false));
        assert_eq!(consent.preference("functional"), None);
    }
}
