//! Walks one SOA from draft to funded against an in-memory auth service.
//!
//! cargo run --example approval_walkthrough
//! RUST_LOG=factoring_approval=debug cargo run --example approval_walkthrough
use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use factoring_approval::{
    config::ServiceConfig,
    fees::{Disbursement, PayeeKind, PaymentMethod},
    funds::{ClientFunds, ClientSettings},
    gateway::{StaticPermissionsGateway, UserContact},
    notify::RecordingMailer,
    request::Request,
    role::{Role, RolePermissionBundle},
    service::ApprovalService,
    status::RequestKind,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let gateway = StaticPermissionsGateway::new()
        .with_user(
            "principal-token",
            UserContact::new("principal@example.com", "Pat", "Doe"),
            RolePermissionBundle::new(Role::Principal).add_organization("org-1"),
        )
        .with_user(
            "ae-token",
            UserContact::new("ae@example.com", "Avery", "Ng"),
            RolePermissionBundle::new(Role::Ae)
                .set_approval_limit(Decimal::from(50_000))
                .add_organization("org-1"),
        )
        .with_user(
            "bo-token",
            UserContact::new("bo@example.com", "Sam", "Lee"),
            RolePermissionBundle::new(Role::Bo).add_organization("org-1"),
        );

    let dir = tempfile::tempdir()?;
    let mut config = ServiceConfig::load().context("loading configuration")?;
    config.storage.path = dir.path().join("approvals").to_string_lossy().into_owned();

    let mailer = RecordingMailer::new();
    let service = ApprovalService::open(&config, Arc::new(gateway), Arc::new(mailer.clone()))?;

    service.put_client_funds(
        &ClientFunds::new("client_1")
            .set_ar_balance(Decimal::from(120_000))
            .set_funding_balance(Decimal::from(60_000))
            .set_current_limit(Decimal::from(100_000)),
    )?;
    service.put_client_settings(
        &ClientSettings::new("client_1")
            .set_wire_fee(Decimal::from(15))
            .set_high_priority_fee(Decimal::from(25)),
    )?;

    let request = Request::new(RequestKind::Soa, "client_1")?
        .set_invoice_total(Decimal::from(25_000))
        .set_advance_amount(Decimal::from(20_000));
    let request = service.create_request("principal-token", request)?;
    service.add_disbursement(
        "principal-token",
        &request.id,
        Disbursement::new("payee_acme", PayeeKind::Client, PaymentMethod::Wire, Decimal::from(19_000)),
    )?;

    let preview = service.preview_balances(&request.id, Decimal::ZERO)?;
    println!(
        "preview funding balance {} ({})",
        preview.balances.preview_funding_balance, preview.client_limit_flag.flag_msg
    );

    service.submit("principal-token", &request.id)?;
    let approval = service.approve("ae-token", &request.id)?;
    println!("after approval: {}", approval.request.status);

    let funded = service.fund("bo-token", &request.id)?;
    println!("after funding: {}", funded.status);

    let fees = service.disbursement_fees(&request.id)?;
    println!("disbursed {} after {} in fees", fees.disbursement_amount, fees.total_fee_to_client);

    for entry in service.history(&request.id)?.live_entries() {
        println!("{:<14} {}", entry.key, entry.user);
    }

    service.notifier().flush();
    for message in mailer.sent() {
        println!("mail to {}: {}", message.recipients[0].email, message.subject);
    }
    Ok(())
}
