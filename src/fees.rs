//! Disbursement fee math for SOA and reserve release requests.
use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::funds::ClientSettings;
use crate::utils::bankers_round;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[n(0)]
    Cheque,
    #[n(1)]
    DirectDeposit,
    #[n(2)]
    InternationalWire,
    #[n(3)]
    SameDayAch,
    #[n(4)]
    Wire,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::DirectDeposit => "direct_deposit",
            PaymentMethod::InternationalWire => "international_wire",
            PaymentMethod::SameDayAch => "same_day_ach",
            PaymentMethod::Wire => "wire",
        };
        f.write_str(name)
    }
}

/// Whether money goes to the client itself or to a third party on its behalf.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PayeeKind {
    #[n(0)]
    Client,
    #[n(1)]
    ThirdParty,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub client_id: String,
    #[n(3)]
    pub payee_id: String,
    #[n(4)]
    pub payee_kind: PayeeKind,
    #[n(5)]
    pub payment_method: PaymentMethod,
    #[n(6)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub amount: Decimal,
    #[n(7)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub client_fee: Decimal,
    #[n(8)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub third_party_fee: Decimal,
    #[n(9)]
    pub is_deleted: bool,
}

impl Disbursement {
    pub fn new(
        payee_id: &str,
        payee_kind: PayeeKind,
        payment_method: PaymentMethod,
        amount: Decimal,
    ) -> Self {
        Self {
            id: String::new(),
            request_id: String::new(),
            client_id: String::new(),
            payee_id: payee_id.to_string(),
            payee_kind,
            payment_method,
            amount,
            client_fee: Decimal::ZERO,
            third_party_fee: Decimal::ZERO,
            is_deleted: false,
        }
    }
    pub fn set_client_fee(mut self, fee: Decimal) -> Self {
        self.client_fee = fee;
        self
    }
    pub fn set_third_party_fee(mut self, fee: Decimal) -> Self {
        self.third_party_fee = fee;
        self
    }

    /// Amount the payee receives once the recorded fees are taken off.
    pub fn net_amount(&self) -> Decimal {
        bankers_round(self.amount - (self.client_fee + self.third_party_fee))
    }
}

/// Fee amounts charged per payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub wire: Decimal,
    pub cheque: Decimal,
    pub international_wire: Decimal,
    pub same_day_ach: Decimal,
    pub high_priority: Decimal,
    pub third_party: Decimal,
}

impl FeeSchedule {
    /// The principal's own fees, used when a client has no settings.
    pub fn principal() -> Self {
        Self {
            wire: Decimal::from(20),
            cheque: Decimal::from(20),
            international_wire: Decimal::from(45),
            same_day_ach: Decimal::from(5),
            high_priority: Decimal::from(25),
            third_party: Decimal::from(5),
        }
    }

    pub fn for_client(settings: Option<&ClientSettings>) -> Self {
        settings.map(FeeSchedule::from).unwrap_or_else(FeeSchedule::principal)
    }

    /// Fee for sending one disbursement, before any high priority charge.
    pub fn method_fee(&self, kind: PayeeKind, method: PaymentMethod) -> Decimal {
        let base = match method {
            PaymentMethod::Wire => self.wire,
            PaymentMethod::SameDayAch => self.same_day_ach,
            PaymentMethod::Cheque => self.cheque,
            PaymentMethod::InternationalWire => self.international_wire,
            PaymentMethod::DirectDeposit => Decimal::ZERO,
        };
        match kind {
            PayeeKind::Client => base,
            PayeeKind::ThirdParty => base + self.third_party,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule::principal()
    }
}

// client settings carry no cheque or international wire fee of their own
impl From<&ClientSettings> for FeeSchedule {
    fn from(settings: &ClientSettings) -> Self {
        let principal = FeeSchedule::principal();
        Self {
            wire: settings.wire_fee,
            same_day_ach: settings.same_day_ach_fee,
            high_priority: settings.high_priority_fee,
            third_party: settings.third_party_fee,
            cheque: principal.cheque,
            international_wire: principal.international_wire,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisbursementFees {
    /// Recorded client and third party fees on client payees.
    pub fees_to_client: Decimal,
    /// Recorded client and third party fees on third party payees.
    pub third_party_fees: Decimal,
    /// Schedule fees for every disbursement plus the high priority fee.
    pub total_fee_to_client: Decimal,
    /// High priority fee plus every recorded fee, used for ledger export.
    pub total_fees_asap: Decimal,
    pub high_priority_amount: Decimal,
    pub asap_amount: Decimal,
    pub total_amount: Decimal,
    pub disbursement_amount: Decimal,
    pub recorded_disbursement_amount: Decimal,
    pub outstanding_amount: Decimal,
    pub payee_ids: Vec<String>,
}

/// Totals the fees of every live disbursement of a request.
///
/// `advance_subtotal` is the advance after miscellaneous and discount fee
/// adjustments; `advance_amount` is the raw advance the outstanding amount
/// is measured against.
pub fn calculate_fees(
    schedule: &FeeSchedule,
    disbursements: &[Disbursement],
    high_priority: bool,
    advance_amount: Decimal,
    advance_subtotal: Decimal,
) -> DisbursementFees {
    let mut fees = DisbursementFees {
        high_priority_amount: schedule.high_priority,
        ..DisbursementFees::default()
    };
    if high_priority {
        fees.total_fee_to_client += schedule.high_priority;
        fees.total_fees_asap += schedule.high_priority;
        fees.asap_amount = schedule.high_priority;
    }

    let mut payees = BTreeSet::new();
    for disbursement in disbursements.iter().filter(|d| !d.is_deleted) {
        payees.insert(disbursement.payee_id.clone());

        fees.total_fee_to_client +=
            schedule.method_fee(disbursement.payee_kind, disbursement.payment_method);

        let recorded = disbursement.client_fee + disbursement.third_party_fee;
        match disbursement.payee_kind {
            PayeeKind::Client => {
                fees.fees_to_client += recorded;
                // client payees count only their client fee
                fees.total_fees_asap += disbursement.client_fee;
            }
            PayeeKind::ThirdParty => {
                fees.third_party_fees += recorded;
                fees.total_fees_asap += recorded;
            }
        }
        fees.total_amount += disbursement.amount;
    }

    fees.payee_ids = payees.into_iter().collect();
    fees.disbursement_amount = advance_subtotal - fees.total_fee_to_client;
    fees.recorded_disbursement_amount = advance_subtotal - fees.total_fees_asap;
    fees.outstanding_amount = advance_amount - (fees.total_amount + fees.asap_amount);
    fees
}

/// Net total paid out by a reserve release.
pub fn reserve_release_net_total(disbursements: &[Disbursement]) -> Decimal {
    disbursements
        .iter()
        .filter(|d| !d.is_deleted)
        .map(|d| d.amount - d.client_fee - d.third_party_fee)
        .sum()
}
