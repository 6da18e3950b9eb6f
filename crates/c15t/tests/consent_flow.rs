//! End-to-end consent flows on every built-in backend.

use c15t::hooks::{HookAction, HookOperation};
use c15t::{
    C15t, C15tConfig, C15tError, DatabaseConfig, SetConsentRequest, SubjectRef,
    VerifyConsentRequest, WithdrawConsentRequest,
};
use c15t_adapter::{AdapterError, Query};
use c15t_config::StorageKind;
use tempfile::TempDir;
use test_case::test_case;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Sqlite,
}

async fn open(backend: Backend, hooks: bool) -> C15t {
    let database = match backend {
        Backend::Memory => DatabaseConfig::Memory,
        Backend::Sqlite => DatabaseConfig::from_url("sqlite::memory:").unwrap(),
    };
    let mut builder = C15t::builder().database(database);
    if hooks {
        builder = builder.hooks(|registry| {
            registry.before_fn("auditLog", HookOperation::Create, |_, data| {
                if data["actionType"].as_str() == Some("consent_withdrawn") {
                    Ok(HookAction::Abort)
                } else {
                    Ok(HookAction::Continue(None))
                }
            })?;
            Ok(())
        });
    }
    let c15t = builder.build().await.unwrap();
    if matches!(backend, Backend::Sqlite) {
        let plan = c15t.migrate().await.unwrap();
        assert_eq!(plan.to_be_created.len(), 11);
    }
    c15t
}

fn banner() -> SetConsentRequest {
    SetConsentRequest::new("shop.example", "cookie_banner")
        .subject(SubjectRef::ExternalId("customer-7".into()))
        .preference("necessary", true)
        .preference("analytics", false)
        .ip_address("192.0.2.1")
        .user_agent("test-agent")
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
#[tokio::test]
async fn consent_lifecycle(backend: Backend) {
    let c15t = open(backend, false).await;
    let visitor = SubjectRef::ExternalId("customer-7".into());

    let set = c15t.set_consent(banner()).await.unwrap();
    assert_eq!(set.consent.preference("analytics"), Some(false));
    assert_eq!(set.subject.last_ip_address.as_deref(), Some("192.0.2.1"));

    let verified = c15t
        .verify_consent(&VerifyConsentRequest::new(visitor.clone(), "shop.example").purpose("necessary"))
        .await
        .unwrap();
    assert!(verified.is_valid);

    let current = c15t
        .get_consent(&visitor, Some("shop.example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, set.consent.id);

    c15t.withdraw_consent(WithdrawConsentRequest::new(set.consent.id.as_str()).method("banner"))
        .await
        .unwrap();
    assert_eq!(c15t.get_consent(&visitor, None).await.unwrap(), None);

    let history = c15t.consent_history(&visitor).await.unwrap();
    assert_eq!(history.consents.len(), 1);
    assert_eq!(history.withdrawals[0].withdrawal_method, "banner");
    assert_eq!(history.records.len(), 2);
    assert_eq!(history.audit_logs.len(), 2);
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
#[tokio::test]
async fn aborted_write_rolls_back_the_operation(backend: Backend) {
    let c15t = open(backend, true).await;
    let set = c15t.set_consent(banner()).await.unwrap();

    let err = c15t
        .withdraw_consent(WithdrawConsentRequest::new(set.consent.id.as_str()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        C15tError::Adapter(AdapterError::Aborted { ref model }) if model == "auditLog"
    ));

    let consent = c15t
        .get_consent(&SubjectRef::Id(set.subject.id.clone()), None)
        .await
        .unwrap()
        .unwrap();
    assert!(consent.is_active);
    let withdrawals = c15t
        .adapter()
        .count(Query::new("consentWithdrawal"))
        .await
        .unwrap();
    assert_eq!(withdrawals, 0);
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
#[tokio::test]
async fn status_reports_backend(backend: Backend) {
    let c15t = open(backend, false).await;
    let status = c15t.status().await;
    assert!(status.database_ok);
    match backend {
        Backend::Memory => assert_eq!(status.adapter, "memory"),
        Backend::Sqlite => {
            assert_eq!(status.adapter, "sql");
            assert_eq!(status.dialect, Some(c15t::Dialect::Sqlite));
        }
    }
}

#[tokio::test]
async fn sqlite_file_from_config_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut config = C15tConfig::default();
    config.database.adapter = StorageKind::Sql;
    config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("c15t.db").display());

    let first = C15t::from_config(&config).await.unwrap();
    first.migrate().await.unwrap();
    let set = first.set_consent(banner()).await.unwrap();
    first.close().await;

    let second = C15t::from_config(&config).await.unwrap();
    assert!(second.migration_plan().await.unwrap().is_empty());
    let found = second
        .get_consent(&SubjectRef::Id(set.subject.id), Some("shop.example"))
        .await
        .unwrap();
    assert_eq!(found.map(|c| c.id), Some(set.consent.id));
    second.close().await;
}
