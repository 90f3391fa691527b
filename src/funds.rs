//! Client fund balances and fee settings, owned by the client record and
//! read by the balance and fee calculators.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balances and percentages for one client. Every figure may be missing;
/// calculators treat a missing figure as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientFunds {
    pub client_id: String,
    pub ar_balance: Option<Decimal>,
    pub funding_balance: Option<Decimal>,
    pub reserve_balance: Option<Decimal>,
    pub current_limit: Option<Decimal>,
    pub discount_fees_percentage: Option<Decimal>,
    pub credit_insurance_total_percentage: Option<Decimal>,
    pub reserves_withheld_percentage: Option<Decimal>,
}

impl ClientFunds {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..Self::default()
        }
    }
    pub fn set_ar_balance(mut self, value: Decimal) -> Self {
        self.ar_balance = Some(value);
        self
    }
    pub fn set_funding_balance(mut self, value: Decimal) -> Self {
        self.funding_balance = Some(value);
        self
    }
    pub fn set_reserve_balance(mut self, value: Decimal) -> Self {
        self.reserve_balance = Some(value);
        self
    }
    pub fn set_current_limit(mut self, value: Decimal) -> Self {
        self.current_limit = Some(value);
        self
    }
    pub fn set_discount_fees_percentage(mut self, value: Decimal) -> Self {
        self.discount_fees_percentage = Some(value);
        self
    }
    pub fn set_credit_insurance_total_percentage(mut self, value: Decimal) -> Self {
        self.credit_insurance_total_percentage = Some(value);
        self
    }
    pub fn set_reserves_withheld_percentage(mut self, value: Decimal) -> Self {
        self.reserves_withheld_percentage = Some(value);
        self
    }
}

/// Per-client fee overrides. Absent settings fall back to the principal's
/// fee schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub client_id: String,
    pub high_priority_fee: Decimal,
    pub same_day_ach_fee: Decimal,
    pub wire_fee: Decimal,
    pub third_party_fee: Decimal,
}

impl ClientSettings {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..Self::default()
        }
    }
    pub fn set_high_priority_fee(mut self, value: Decimal) -> Self {
        self.high_priority_fee = value;
        self
    }
    pub fn set_same_day_ach_fee(mut self, value: Decimal) -> Self {
        self.same_day_ach_fee = value;
        self
    }
    pub fn set_wire_fee(mut self, value: Decimal) -> Self {
        self.wire_fee = value;
        self
    }
    pub fn set_third_party_fee(mut self, value: Decimal) -> Self {
        self.third_party_fee = value;
        self
    }
}
