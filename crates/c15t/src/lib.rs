//! # c15t
//!
//! Consent management storage for GDPR and CCPA compliance.
//!
//! A [`C15t`] instance records which tracking purposes a visitor agreed to
//! on a domain, under which policy, and keeps an audit trail of every
//! change:
//!
//! - **Consent operations** - [`C15t::set_consent`], [`C15t::get_consent`],
//!   [`C15t::verify_consent`], [`C15t::consent_history`],
//!   [`C15t::withdraw_consent`]
//! - **Storage** - memory or SQL (Postgres, MySQL, SQLite) through
//!   [`DatabaseConfig`], or any custom [`Adapter`]
//! - **Hooks** - before/after callbacks on every create and update
//! - **Migrations** - [`C15t::migrate`] creates missing tables and columns
//!
//! # Quick Start
//!
//! ```
//! # async fn demo() -> c15t::Result<()> {
//! use c15t::{C15t, SetConsentRequest, SubjectRef, VerifyConsentRequest};
//!
//! let c15t = C15t::in_memory().await?;
//! let visitor = SubjectRef::ExternalId("user-1".to_string());
//!
//! c15t.set_consent(
//!     SetConsentRequest::new("example.com", "cookie_banner")
//!         .subject(visitor.clone())
//!         .preference("analytics", true)
//!         .preference("marketing", false),
//! )
//! .await?;
//!
//! let check = c15t
//!     .verify_consent(&VerifyConsentRequest::new(visitor, "example.com").purpose("analytics"))
//!     .await?;
//! assert!(check.is_valid);
//! # Ok(())
//! # }
//! ```

mod c15t;
pub mod consent;
mod database;
mod error;
mod registry;

pub use crate::c15t::{C15t, C15tBuilder, Status};
pub use consent::{
    ConsentHistory, SetConsentRequest, SetConsentResponse, VerifyConsentRequest,
    VerifyConsentResponse, VerifyFailure, WithdrawConsentRequest, WithdrawConsentResponse,
};
pub use database::DatabaseConfig;
pub use error::{C15tError, Result};
pub use registry::SubjectRef;

// Re-export the layers a host application touches directly
pub use c15t_adapter::{Adapter, Dialect, SqlDatabase, hooks};
pub use c15t_config::C15tConfig;
pub use c15t_migration::MigrationPlan;
pub use c15t_schema::{
    AuditLog, Consent, ConsentPolicy, ConsentPurpose, ConsentRecord, ConsentWithdrawal, Domain,
    Entity, SchemaOptions, Subject, TableOptions,
};
pub use c15t_types::{ErrorCode, IdGeneration, Record, Value};
