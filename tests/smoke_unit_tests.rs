//! Smoke Screen Unit tests for the approval workflow components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use factoring_approval::{
    balances::{ClientBalances, FlagType},
    fees::{Disbursement, FeeSchedule, PayeeKind, PaymentMethod, calculate_fees},
    funds::ClientFunds,
    history::{ApprovalHistory, ApprovalHistoryEntry, FUNDED_AT},
    request::Request,
    role::{Role, RolePermissionBundle},
    status::{RequestKind, Status},
    transition::{Access, access, allowed_targets, can_transition},
    utils::{TimeStamp, bankers_round, new_uuid_to_bech32},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("soa_").unwrap();
        assert!(encoded.starts_with("soa_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    /// Ties go to the even neighbour
    #[test]
    fn bankers_rounding() {
        assert_eq!(bankers_round(dec!(2.345)), dec!(2.34));
        assert_eq!(bankers_round(dec!(2.355)), dec!(2.36));
        assert_eq!(bankers_round(dec!(-2.345)), dec!(-2.34));
        assert_eq!(bankers_round(dec!(10)), dec!(10));
    }

    #[test]
    fn timestamp_minicbor_encoding() {
        let original = TimeStamp::new_with(2025, 3, 1, 9, 30, 0);
        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();
        assert_eq!(original, decode);
    }
}

// TRANSITION MODULE TESTS
#[cfg(test)]
mod transition_tests {
    use super::*;

    /// The AE may approve, send back or reject a pending SOA but never
    /// hand it back to the principal's draft
    #[test]
    fn ae_targets_for_pending_soa() {
        let targets = allowed_targets(RequestKind::Soa, Role::Ae, Status::Pending);
        for status in [Status::ActionRequired, Status::Rejected, Status::Approved] {
            assert!(targets.contains(&status), "{status}");
        }
        for status in [Status::Draft, Status::Pending, Status::Completed] {
            assert!(!targets.contains(&status), "{status}");
        }
    }

    #[test]
    fn bo_funds_approved_requests() {
        let decision =
            can_transition(RequestKind::ReserveRelease, Role::Bo, Status::Approved, Some(Status::Completed));
        assert!(decision.allowed);
        assert_eq!(
            decision.reason,
            "bo has permission for updating Reserve Release having status approved to completed"
        );
    }

    #[test]
    fn view_only_roles_on_compliance() {
        for status in RequestKind::ComplianceRepository.statuses() {
            assert_eq!(
                access(RequestKind::ComplianceRepository, Role::Ae, *status),
                Access::AlwaysDenied
            );
        }
    }
}

// FEES MODULE TESTS
#[cfg(test)]
mod fees_tests {
    use super::*;

    /// Principal fees apply when the client has no settings
    #[test]
    fn principal_schedule_fallback() {
        let schedule = FeeSchedule::for_client(None);
        let disbursements = vec![
            Disbursement::new("p1", PayeeKind::Client, PaymentMethod::Wire, dec!(1000)),
            Disbursement::new("p2", PayeeKind::ThirdParty, PaymentMethod::SameDayAch, dec!(500)),
        ];

        let fees = calculate_fees(&schedule, &disbursements, true, dec!(2000), dec!(2000));

        // wire 20 + (same day 5 + third party 5) + high priority 25
        assert_eq!(fees.total_fee_to_client, dec!(55));
        assert_eq!(fees.disbursement_amount, dec!(1945));
        assert_eq!(fees.outstanding_amount, dec!(475));
        assert_eq!(fees.payee_ids, vec!["p1".to_string(), "p2".to_string()]);
    }
}

// BALANCES MODULE TESTS
#[cfg(test)]
mod balances_tests {
    use super::*;

    fn funds() -> ClientFunds {
        ClientFunds::new("client_1")
            .set_ar_balance(dec!(100000))
            .set_funding_balance(dec!(80000))
            .set_current_limit(dec!(100000))
    }

    /// A draft SOA previews with the invoice total typed into the form
    #[test]
    fn draft_preview_uses_typed_invoice_total() {
        let request = Request::new(RequestKind::Soa, "client_1")
            .unwrap()
            .set_advance_amount(dec!(5000));
        let history = ApprovalHistory::new(&request.id);

        let balances =
            ClientBalances::calculate(&request, dec!(6250.005), &history, Some(&funds()));

        assert_eq!(balances.cal_invoice_total, dec!(6250.00));
        assert_eq!(balances.preview_ar_balance, dec!(106250.00));
        assert_eq!(balances.preview_funding_balance, dec!(85000));
        assert_eq!(balances.client_funding_balance, dec!(15));
        assert_eq!(balances.client_limit_flag().flag_type, FlagType::Success);
    }

    #[test]
    fn completed_request_reads_funded_snapshot() {
        let request = Request::new(RequestKind::Soa, "client_1")
            .unwrap()
            .set_status(Status::Completed);
        let mut history = ApprovalHistory::new(&request.id);
        history.insert_entry(ApprovalHistoryEntry::new(
            &request.id,
            RequestKind::Soa,
            FUNDED_AT,
            "bo@example.com",
            json!({"client_funds": {"funding_balance": "1000", "current_limit": "2000"}}),
        ));

        let balances = ClientBalances::calculate(&request, Decimal::ZERO, &history, Some(&funds()));
        assert_eq!(balances.funding_balance, dec!(1000));
        assert_eq!(balances.client_limit, dec!(2000));
    }
}

// ROLE MODULE TESTS
#[cfg(test)]
mod role_tests {
    use super::*;

    #[test]
    fn missing_role_is_reported() {
        let bundle = RolePermissionBundle::default();
        assert!(bundle.role().is_err());
        assert_eq!(bundle.ae_approval_limit(), Decimal::ZERO);
    }
}
