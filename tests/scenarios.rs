use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sled::open;
use std::sync::Arc;

use factoring_approval::{
    balances::FundsSource,
    config::ServiceConfig,
    error::ApprovalError,
    escalation::ReviewerTier,
    fees::{Disbursement, PayeeKind, PaymentMethod},
    funds::{ClientFunds, ClientSettings},
    gateway::{StaticPermissionsGateway, UserContact},
    history::{ACTION_REQUIRED, APPROVED_AT, CREATED_AT, DELETED_AT, FUNDED_AT, SUBMITTED_AT, UPDATED_AT},
    notify::RecordingMailer,
    request::{Request, RequestUpdate},
    role::{Role, RolePermissionBundle},
    service::ApprovalService,
    status::{RequestKind, Status},
};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

const CLIENT: &str = "client_1";

fn directory() -> StaticPermissionsGateway {
    StaticPermissionsGateway::new()
        .with_user(
            "t-principal",
            UserContact::new("p@example.com", "Pat", "Doe"),
            RolePermissionBundle::new(Role::Principal).add_organization("org-1"),
        )
        .with_user(
            "t-ae",
            UserContact::new("ae@example.com", "Avery", "Ng"),
            RolePermissionBundle::new(Role::Ae)
                .set_approval_limit(Decimal::from(50_000))
                .add_organization("org-1"),
        )
        .with_user(
            "t-ae-modify",
            UserContact::new("mod@example.com", "Jo", "Park"),
            RolePermissionBundle::new(Role::Ae)
                .set_approval_limit(Decimal::from(50_000))
                .set_can_modify(true)
                .add_organization("org-1"),
        )
        .with_user(
            "t-fom",
            UserContact::new("fom@example.com", "Robin", "Hale"),
            RolePermissionBundle::new(Role::Ae)
                .set_approval_limit(Decimal::from(1_000_000))
                .add_organization("org-1"),
        )
        .with_user(
            "t-bo",
            UserContact::new("bo@example.com", "Sam", "Lee"),
            RolePermissionBundle::new(Role::Bo).add_organization("org-1"),
        )
        .with_user(
            "t-client",
            UserContact::new("client@example.com", "Casey", "Fox"),
            RolePermissionBundle::new(Role::Client),
        )
}

// Sled holds a file lock on the db, so every test opens its own in a temp dir.
fn service(name: &str) -> anyhow::Result<(TempDir, ApprovalService, RecordingMailer)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let mailer = RecordingMailer::new();

    let service = ApprovalService::new(
        Arc::new(db),
        Arc::new(directory()),
        Arc::new(mailer.clone()),
        &ServiceConfig::default(),
    );
    service.put_client_funds(
        &ClientFunds::new(CLIENT)
            .set_ar_balance(dec!(50000))
            .set_funding_balance(dec!(20000))
            .set_current_limit(dec!(100000)),
    )?;
    service.put_client_settings(
        &ClientSettings::new(CLIENT)
            .set_wire_fee(dec!(10))
            .set_high_priority_fee(dec!(25))
            .set_same_day_ach_fee(dec!(5))
            .set_third_party_fee(dec!(5)),
    )?;
    Ok((temp_dir, service, mailer))
}

fn soa(advance: Decimal) -> anyhow::Result<Request> {
    Ok(Request::new(RequestKind::Soa, CLIENT)?
        .set_invoice_total(advance * dec!(1.25))
        .set_advance_amount(advance))
}

fn denied(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApprovalError>(), Some(ApprovalError::PermissionDenied(_)))
}

#[test]
fn soa_submit_approve_fund() -> anyhow::Result<()> {
    let (_dir, service, mailer) = service("lifecycle.db")?;

    let request = service.create_request("t-principal", soa(dec!(20000))?)?;
    assert_eq!(request.status, Status::Draft);
    assert_eq!(request.created_by, "p@example.com");

    service.add_disbursement(
        "t-principal",
        &request.id,
        Disbursement::new("payee_1", PayeeKind::Client, PaymentMethod::Wire, dec!(15000)),
    )?;
    let request = service.load(&request.id)?;
    assert_eq!(request.disbursement_amount, dec!(19990));

    let request = service
        .submit("t-principal", &request.id)
        .context("SOA Failed on Submit: ")?;
    assert_eq!(request.status, Status::Pending);

    let result = service
        .approve("t-ae", &request.id)
        .context("SOA Failed on Approval: ")?;
    assert_eq!(result.request.status, Status::Approved);
    let escalation = result.escalation.context("funding approval runs escalation")?;
    assert!(!escalation.exception);
    assert!(escalation.notices.is_empty());

    let request = service.fund("t-bo", &request.id)?;
    assert_eq!(request.status, Status::Completed);

    let history = service.history(&request.id)?;
    for key in [CREATED_AT, SUBMITTED_AT, APPROVED_AT, FUNDED_AT] {
        assert_eq!(history.count(key), 1, "{key}");
    }

    service.notifier().flush();
    let subjects: Vec<String> = mailer.sent().into_iter().map(|m| m.subject).collect();
    assert!(subjects.contains(&"SOA Request Submitted".to_string()));
    assert!(subjects.contains(&"SOA Request Approved".to_string()));
    assert!(subjects.contains(&"SOA Request Processed".to_string()));

    Ok(())
}

#[test]
fn large_soa_is_escalated_to_reviewed() -> anyhow::Result<()> {
    let (_dir, service, mailer) = service("escalation.db")?;

    let request = service.create_request("t-principal", soa(dec!(600000))?)?;
    service.submit("t-principal", &request.id)?;

    let result = service.approve("t-ae", &request.id)?;
    assert_eq!(result.request.status, Status::Reviewed);
    let escalation = result.escalation.context("funding approval runs escalation")?;
    assert!(escalation.exception);
    assert_eq!(escalation.tier(), Some(ReviewerTier::FactoringOperationsManager));

    service.notifier().flush();
    // the FOM tier first, then everyone holding can_modify
    let reviewers: Vec<String> = mailer
        .sent()
        .into_iter()
        .filter(|m| m.subject.starts_with("Please review SOA"))
        .map(|m| m.recipients[0].email.clone())
        .collect();
    assert_eq!(reviewers, vec!["fom@example.com", "mod@example.com"]);

    // the same AE cannot push it through a second time
    let err = service.approve("t-ae", &request.id).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApprovalError>(),
        Some(ApprovalError::AlreadyReviewed)
    ));

    let result = service.approve("t-fom", &request.id)?;
    assert_eq!(result.request.status, Status::Approved);

    Ok(())
}

#[test]
fn sent_back_request_escalates_to_coo() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("sent_back.db")?;

    let request = service.create_request("t-principal", soa(dec!(30000))?)?;
    service.submit("t-principal", &request.id)?;
    let request = service.send_back("t-ae", &request.id)?;
    assert_eq!(request.status, Status::ActionRequired);

    let request = service.submit("t-principal", &request.id)?;
    assert_eq!(request.status, Status::Pending);

    let history = service.history(&request.id)?;
    assert_eq!(history.count(SUBMITTED_AT), 2);
    assert_eq!(history.count(ACTION_REQUIRED), 1);

    let result = service.approve("t-ae", &request.id)?;
    assert_eq!(result.request.status, Status::Reviewed);
    let escalation = result.escalation.context("funding approval runs escalation")?;
    assert!(escalation.action_required);
    assert_eq!(escalation.tier(), Some(ReviewerTier::ChiefOperatingOfficer));

    Ok(())
}

#[test]
fn fees_use_settings_frozen_at_submission() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("frozen.db")?;
    service.put_client_settings(&ClientSettings::new(CLIENT).set_wire_fee(dec!(5)))?;

    let request = service.create_request("t-principal", soa(dec!(10000))?)?;
    service.add_disbursement(
        "t-principal",
        &request.id,
        Disbursement::new("payee_1", PayeeKind::Client, PaymentMethod::Wire, dec!(9000)),
    )?;
    service.submit("t-principal", &request.id)?;

    service.put_client_settings(&ClientSettings::new(CLIENT).set_wire_fee(dec!(10)))?;

    let fees = service.disbursement_fees(&request.id)?;
    assert_eq!(fees.total_fee_to_client, dec!(5));
    assert_eq!(fees.disbursement_amount, dec!(9995));

    Ok(())
}

#[test]
fn balances_use_funds_frozen_at_approval() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("balances.db")?;

    let request = service.create_request("t-principal", soa(dec!(10000))?)?;
    service.submit("t-principal", &request.id)?;
    service.approve("t-ae", &request.id)?;

    service.put_client_funds(
        &ClientFunds::new(CLIENT)
            .set_funding_balance(dec!(90000))
            .set_current_limit(dec!(100000)),
    )?;

    let preview = service.preview_balances(&request.id, Decimal::ZERO)?;
    assert_eq!(preview.balances.funds_source, FundsSource::Frozen);
    assert_eq!(preview.balances.funding_balance, dec!(20000));
    assert_eq!(preview.balances.preview_funding_balance, dec!(30000));
    assert_eq!(preview.balances.preview_ar_balance, dec!(62500));

    Ok(())
}

#[test]
fn ae_edits_are_recorded_once_and_cleared_on_approval() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("ae_edits.db")?;

    let request = service.create_request("t-principal", soa(dec!(20000))?)?;
    service.submit("t-principal", &request.id)?;

    let edit = RequestUpdate::new().set_advance_amount(dec!(21000));
    let request = service.update_request("t-ae", &request.id, &edit)?;
    assert_eq!(request.disbursement_amount, dec!(21000));
    service.update_request("t-ae", &request.id, &RequestUpdate::new().set_notes("checked"))?;
    assert_eq!(service.history(&request.id)?.count(UPDATED_AT), 1);

    // an edited request needs a reviewer holding can_modify
    let result = service.approve("t-ae", &request.id)?;
    assert_eq!(result.request.status, Status::Reviewed);
    let escalation = result.escalation.context("funding approval runs escalation")?;
    assert!(!escalation.can_modify_requests);
    assert_eq!(escalation.tier(), None);
    assert_eq!(escalation.notices.len(), 1);

    let result = service.approve("t-ae-modify", &request.id)?;
    assert_eq!(result.request.status, Status::Approved);

    let history = service.history(&request.id)?;
    assert!(!history.is_request_updated());
    assert!(history.entries.iter().any(|e| e.key == UPDATED_AT && e.is_deleted));

    Ok(())
}

#[test]
fn high_priority_needs_outstanding_room() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("high_priority.db")?;

    let request = service.create_request("t-principal", soa(dec!(1000))?)?;
    let disbursement = service.add_disbursement(
        "t-principal",
        &request.id,
        Disbursement::new("payee_1", PayeeKind::Client, PaymentMethod::DirectDeposit, dec!(990)),
    )?;
    assert!(disbursement.id.starts_with("disb_1"));

    let asap = RequestUpdate::new().set_high_priority(true);
    let err = service.update_request("t-principal", &request.id, &asap).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApprovalError>(),
        Some(ApprovalError::InsufficientOutstanding)
    ));
    assert!(!service.load(&request.id)?.high_priority);

    // raising the advance leaves room for the 25.00 fee
    let asap = asap.set_advance_amount(dec!(1100));
    let request = service.update_request("t-principal", &request.id, &asap)?;
    assert!(request.high_priority);
    assert_eq!(request.disbursement_amount, dec!(1075));

    Ok(())
}

#[test]
fn payee_approval_belongs_to_back_office() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("payee.db")?;

    let payee = service.create_request("t-principal", Request::new(RequestKind::Payee, CLIENT)?)?;
    let payee = service.submit("t-principal", &payee.id)?;
    assert_eq!(payee.status, Status::Pending);

    let err = service.approve("t-ae", &payee.id).unwrap_err();
    assert!(denied(&err));
    assert_eq!(
        err.to_string(),
        "ae doesn't have permission for updating Payee having status pending to approved"
    );

    let result = service.approve("t-bo", &payee.id)?;
    assert_eq!(result.request.status, Status::Approved);
    assert!(result.escalation.is_none());

    Ok(())
}

#[test]
fn generic_request_flow() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("generic.db")?;

    let request = service.create_request(
        "t-principal",
        Request::new(RequestKind::GenericRequest, CLIENT)?.set_notes("new bank details"),
    )?;
    let request = service.submit("t-principal", &request.id)?;
    assert_eq!(request.status, Status::Submitted);

    // once submitted the principal is done with it
    let err = service.reject("t-principal", &request.id).unwrap_err();
    assert!(denied(&err));

    let request = service.reject("t-ae", &request.id)?;
    assert_eq!(request.status, Status::Rejected);

    Ok(())
}

#[test]
fn clients_and_unknown_tokens_are_turned_away() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("turned_away.db")?;

    let err = service.create_request("t-client", soa(dec!(100))?).unwrap_err();
    assert!(denied(&err));

    let err = service.create_request("t-nobody", soa(dec!(100))?).unwrap_err();
    match err.downcast_ref::<ApprovalError>() {
        Some(e) => assert_eq!(e.status_code(), 401),
        None => panic!("expected an upstream error, got {err}"),
    }

    Ok(())
}

#[test]
fn deleted_requests_disappear() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("deleted.db")?;

    let request = service.create_request("t-principal", soa(dec!(500))?)?;
    service.delete_request("t-principal", &request.id)?;

    let err = service.load(&request.id).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApprovalError>(),
        Some(ApprovalError::NotFound(_))
    ));
    assert_eq!(service.history(&request.id)?.count(DELETED_AT), 1);

    Ok(())
}

#[test]
fn requests_are_created_in_draft_only() -> anyhow::Result<()> {
    let (_dir, service, _mailer) = service("draft_only.db")?;

    for token in ["t-bo", "t-ae", "t-principal"] {
        let request = soa(dec!(5000000))?.set_status(Status::Approved);
        let id = request.id.clone();
        let err = service.create_request(token, request).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<ApprovalError>(), Some(ApprovalError::Validation(_))),
            "{token}: {err}"
        );

        assert!(service.load(&id).is_err());
        assert_eq!(service.history(&id)?.count(APPROVED_AT), 0);
        assert!(service.fund("t-bo", &id).is_err());
    }

    let request = service.create_request("t-principal", soa(dec!(500))?)?;
    let history = service.history(&request.id)?;
    assert_eq!(history.count(CREATED_AT), 1);
    assert_eq!(history.live_entries().count(), 1);

    Ok(())
}
