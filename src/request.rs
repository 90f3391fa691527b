//! The request entity shared by every variant
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApprovalError;
use crate::status::{RequestKind, Status};
use crate::utils::{TimeStamp, new_uuid_to_bech32};

// One row per request, whatever the variant. Money fields only matter for
// SOA and reserve release; debtor limit approvals use the credit limit pair.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub kind: RequestKind,
    #[n(2)]
    pub client_id: String,
    #[n(3)]
    pub status: Status,
    #[n(4)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub invoice_total: Decimal,
    #[n(5)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub advance_amount: Decimal,
    #[n(6)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub discount_fees: Decimal,
    #[n(7)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub fee_adjustment: Decimal,
    #[n(8)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub miscellaneous_adjustment: Decimal,
    #[n(9)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub discount_fee_adjustment: Decimal,
    #[n(10)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub disbursement_amount: Decimal,
    #[n(11)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub credit_limit_requested: Decimal,
    #[n(12)]
    #[cbor(with = "crate::utils::cbor_decimal")]
    pub credit_limit_approved: Decimal,
    #[n(13)]
    pub high_priority: bool,
    #[n(14)]
    pub notes: String,
    #[n(15)]
    pub created_by: String,
    #[n(16)]
    pub created_at: TimeStamp,
    #[n(17)]
    pub last_processed_at: Option<TimeStamp>,
    #[n(18)]
    pub is_deleted: bool,
    #[n(19)]
    pub deleted_at: Option<TimeStamp>,
}

impl Request {
    /// A new draft with a generated bech32 id.
    pub fn new(kind: RequestKind, client_id: &str) -> anyhow::Result<Self> {
        let id = new_uuid_to_bech32(kind.id_prefix())?;
        Ok(Self {
            id,
            kind,
            client_id: client_id.to_string(),
            status: kind.initial_status(),
            invoice_total: Decimal::ZERO,
            advance_amount: Decimal::ZERO,
            discount_fees: Decimal::ZERO,
            fee_adjustment: Decimal::ZERO,
            miscellaneous_adjustment: Decimal::ZERO,
            discount_fee_adjustment: Decimal::ZERO,
            disbursement_amount: Decimal::ZERO,
            credit_limit_requested: Decimal::ZERO,
            credit_limit_approved: Decimal::ZERO,
            high_priority: false,
            notes: String::new(),
            created_by: String::new(),
            created_at: TimeStamp::new(),
            last_processed_at: None,
            is_deleted: false,
            deleted_at: None,
        })
    }
    pub fn set_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }
    pub fn set_invoice_total(mut self, amount: Decimal) -> Self {
        self.invoice_total = amount;
        self
    }
    pub fn set_advance_amount(mut self, amount: Decimal) -> Self {
        self.advance_amount = amount;
        self
    }
    pub fn set_discount_fees(mut self, amount: Decimal) -> Self {
        self.discount_fees = amount;
        self
    }
    pub fn set_fee_adjustment(mut self, amount: Decimal) -> Self {
        self.fee_adjustment = amount;
        self
    }
    pub fn set_miscellaneous_adjustment(mut self, amount: Decimal) -> Self {
        self.miscellaneous_adjustment = amount;
        self
    }
    pub fn set_discount_fee_adjustment(mut self, amount: Decimal) -> Self {
        self.discount_fee_adjustment = amount;
        self
    }
    pub fn set_disbursement_amount(mut self, amount: Decimal) -> Self {
        self.disbursement_amount = amount;
        self
    }
    pub fn set_credit_limit_requested(mut self, amount: Decimal) -> Self {
        self.credit_limit_requested = amount;
        self
    }
    pub fn set_high_priority(mut self, flag: bool) -> Self {
        self.high_priority = flag;
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }
    pub fn set_created_by(mut self, email: &str) -> Self {
        self.created_by = email.to_string();
        self
    }

    /// Advance left after miscellaneous and discount fee adjustments.
    pub fn advance_subtotal(&self) -> Decimal {
        self.advance_amount - self.miscellaneous_adjustment - self.discount_fee_adjustment
    }

    pub fn validate(&self) -> Result<(), ApprovalError> {
        if self.client_id.is_empty() {
            return Err(ApprovalError::Validation("client_id is required".into()));
        }
        let amounts = [
            ("invoice_total", self.invoice_total),
            ("advance_amount", self.advance_amount),
            ("credit_limit_requested", self.credit_limit_requested),
        ];
        if let Some((name, _)) = amounts.iter().find(|(_, amount)| amount.is_sign_negative()) {
            return Err(ApprovalError::Validation(format!("{name} cannot be negative")));
        }
        Ok(())
    }

    /// JSON copy of the request for the approval history.
    pub fn snapshot(&self) -> Result<Value, ApprovalError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Applies the edit and reports whether any field actually changed.
    pub fn apply(&mut self, update: &RequestUpdate) -> bool {
        let before = self.clone();
        if let Some(amount) = update.invoice_total {
            self.invoice_total = amount;
        }
        if let Some(amount) = update.advance_amount {
            self.advance_amount = amount;
        }
        if let Some(amount) = update.discount_fees {
            self.discount_fees = amount;
        }
        if let Some(amount) = update.fee_adjustment {
            self.fee_adjustment = amount;
        }
        if let Some(amount) = update.miscellaneous_adjustment {
            self.miscellaneous_adjustment = amount;
        }
        if let Some(amount) = update.discount_fee_adjustment {
            self.discount_fee_adjustment = amount;
        }
        if let Some(amount) = update.credit_limit_requested {
            self.credit_limit_requested = amount;
        }
        if let Some(amount) = update.credit_limit_approved {
            self.credit_limit_approved = amount;
        }
        if let Some(flag) = update.high_priority {
            self.high_priority = flag;
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
        *self != before
    }
}

/// Field edits a caller can make without changing status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestUpdate {
    pub invoice_total: Option<Decimal>,
    pub advance_amount: Option<Decimal>,
    pub discount_fees: Option<Decimal>,
    pub fee_adjustment: Option<Decimal>,
    pub miscellaneous_adjustment: Option<Decimal>,
    pub discount_fee_adjustment: Option<Decimal>,
    pub credit_limit_requested: Option<Decimal>,
    pub credit_limit_approved: Option<Decimal>,
    pub high_priority: Option<bool>,
    pub notes: Option<String>,
}

impl RequestUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_advance_amount(mut self, amount: Decimal) -> Self {
        self.advance_amount = Some(amount);
        self
    }
    pub fn set_invoice_total(mut self, amount: Decimal) -> Self {
        self.invoice_total = Some(amount);
        self
    }
    pub fn set_discount_fees(mut self, amount: Decimal) -> Self {
        self.discount_fees = Some(amount);
        self
    }
    pub fn set_credit_limit_approved(mut self, amount: Decimal) -> Self {
        self.credit_limit_approved = Some(amount);
        self
    }
    pub fn set_high_priority(mut self, flag: bool) -> Self {
        self.high_priority = Some(flag);
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    /// Turns high priority on where it was off.
    pub fn enables_high_priority(&self, request: &Request) -> bool {
        self.high_priority == Some(true) && !request.high_priority
    }
}
