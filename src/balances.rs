//! Preview client balances for a funding request (COC1 through COC5).
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::funds::ClientFunds;
use crate::history::ApprovalHistory;
use crate::request::Request;
use crate::status::{RequestKind, Status};
use crate::utils::bankers_round;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsSource {
    /// Taken from the approval or funding snapshot in history.
    Frozen,
    Live,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitFlag {
    pub flag_type: FlagType,
    pub flag_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientBalances {
    pub funds_source: FundsSource,
    pub client_funds: Option<ClientFunds>,
    pub cal_invoice_total: Decimal,
    pub advance_amount: Decimal,
    pub discount_fees: Decimal,
    pub fee_adjustment: Decimal,
    pub ar_balance: Decimal,
    pub funding_balance: Decimal,
    pub reserve_balance: Decimal,
    pub client_limit: Decimal,
    /// COC1
    pub preview_ar_balance: Decimal,
    /// COC2
    pub preview_funding_balance: Decimal,
    /// COC3
    pub preview_reserve_balance: Decimal,
    /// COC4, a percentage of the client limit
    pub client_funding_balance: Decimal,
}

impl ClientBalances {
    /// Computes the preview for `request`.
    ///
    /// Funds frozen into history when the request was approved or funded
    /// win over `live_funds`. `invoice_total` replaces the stored invoice
    /// total while an SOA is still a draft.
    pub fn calculate(
        request: &Request,
        invoice_total: Decimal,
        history: &ApprovalHistory,
        live_funds: Option<&ClientFunds>,
    ) -> Self {
        let (funds_source, client_funds) = match history.frozen_client_funds(request.status) {
            Some(frozen) => (FundsSource::Frozen, Some(frozen)),
            None => match live_funds {
                Some(live) => (FundsSource::Live, Some(live.clone())),
                None => (FundsSource::Missing, None),
            },
        };

        // only an SOA carries invoice and advance figures into the preview
        let is_soa = request.kind == RequestKind::Soa;
        let cal_invoice_total = if !is_soa {
            Decimal::ZERO
        } else if !invoice_total.is_zero() && request.status == Status::Draft {
            bankers_round(invoice_total)
        } else {
            request.invoice_total
        };
        let (advance_amount, discount_fees, fee_adjustment) = if is_soa {
            (request.advance_amount, request.discount_fees, request.fee_adjustment)
        } else {
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        };

        let figure = |pick: fn(&ClientFunds) -> Option<Decimal>| {
            client_funds
                .as_ref()
                .and_then(pick)
                .map(bankers_round)
                .unwrap_or(Decimal::ZERO)
        };
        let ar_balance = figure(|f| f.ar_balance);
        let funding_balance = figure(|f| f.funding_balance);
        let reserve_balance = figure(|f| f.reserve_balance);
        let client_limit = figure(|f| f.current_limit);

        let preview_ar_balance = ar_balance + cal_invoice_total;
        let preview_funding_balance = funding_balance + advance_amount + discount_fees + fee_adjustment;
        let preview_reserve_balance = preview_ar_balance - preview_funding_balance;
        let client_funding_balance = if client_limit > Decimal::ZERO {
            bankers_round(
                (client_limit - preview_funding_balance).abs() / client_limit * Decimal::ONE_HUNDRED,
            )
        } else {
            Decimal::ZERO
        };

        Self {
            funds_source,
            client_funds,
            cal_invoice_total,
            advance_amount,
            discount_fees,
            fee_adjustment,
            ar_balance,
            funding_balance,
            reserve_balance,
            client_limit,
            preview_ar_balance,
            preview_funding_balance,
            preview_reserve_balance,
            client_funding_balance,
        }
    }

    /// COC5: how the preview funding balance sits against the client limit.
    pub fn client_limit_flag(&self) -> LimitFlag {
        let coc2 = self.preview_funding_balance;
        let coc4 = self.client_funding_balance;
        let ten = Decimal::TEN;

        let (flag_type, flag_msg) = if coc2 < Decimal::ZERO {
            (FlagType::Warning, "Client Funding Balance is negative.".to_string())
        } else if coc2 < self.client_limit && coc4 > ten {
            (FlagType::Success, below_limit(coc4))
        } else if coc2 < self.client_limit && coc4 > Decimal::ZERO && coc4 < ten {
            (FlagType::Warning, below_limit(coc4))
        } else if coc2 > self.client_limit {
            (
                FlagType::Error,
                format!(
                    "Client Funding Balance will be {coc4}% over the client limit facility set by the Credit Committee if this SOA is funded"
                ),
            )
        } else {
            (FlagType::Warning, "Client Funding Balance not available".to_string())
        };

        LimitFlag { flag_type, flag_msg }
    }
}

fn below_limit(coc4: Decimal) -> String {
    format!(
        "Client Funding Balance will be {coc4}% below the client limit facility set by the Credit Committee if this SOA is funded"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{APPROVED_AT, ApprovalHistoryEntry};
    use serde_json::json;

    fn soa(advance: i64) -> Request {
        Request::new(RequestKind::Soa, "client_1")
            .unwrap()
            .set_status(Status::Pending)
            .set_advance_amount(Decimal::from(advance))
    }

    fn funds() -> ClientFunds {
        ClientFunds::new("client_1")
            .set_current_limit(Decimal::from(100_000))
            .set_funding_balance(Decimal::ZERO)
    }

    fn flag(advance: i64) -> FlagType {
        let history = ApprovalHistory::new("soa_1");
        ClientBalances::calculate(&soa(advance), Decimal::ZERO, &history, Some(&funds()))
            .client_limit_flag()
            .flag_type
    }

    #[test]
    fn coc5_boundaries() {
        assert_eq!(flag(95_000), FlagType::Warning);
        assert_eq!(flag(80_000), FlagType::Success);
        assert_eq!(flag(150_000), FlagType::Error);
    }

    #[test]
    fn exact_limit_is_not_available() {
        let history = ApprovalHistory::new("soa_1");
        let balances =
            ClientBalances::calculate(&soa(100_000), Decimal::ZERO, &history, Some(&funds()));
        let flag = balances.client_limit_flag();
        assert_eq!(flag.flag_type, FlagType::Warning);
        assert_eq!(flag.flag_msg, "Client Funding Balance not available");
    }

    #[test]
    fn exactly_ten_percent_falls_through() {
        assert_eq!(flag(90_000), FlagType::Warning);
    }

    #[test]
    fn preview_figures() {
        let funds = funds()
            .set_ar_balance(Decimal::new(1_000_005, 3))
            .set_funding_balance(Decimal::from(500));
        let request = Request::new(RequestKind::Soa, "client_1")
            .unwrap()
            .set_invoice_total(Decimal::from(2_000))
            .set_advance_amount(Decimal::from(1_500))
            .set_discount_fees(Decimal::from(30))
            .set_fee_adjustment(Decimal::from(-10));

        let history = ApprovalHistory::new(&request.id);
        let balances =
            ClientBalances::calculate(&request, Decimal::new(250_0055, 4), &history, Some(&funds));

        // 1000.005 rounds to 1000.00, the draft invoice total 250.0055 to 250.01
        assert_eq!(balances.ar_balance, Decimal::new(100_000, 2));
        assert_eq!(balances.cal_invoice_total, Decimal::new(25_001, 2));
        assert_eq!(balances.preview_ar_balance, Decimal::new(125_001, 2));
        assert_eq!(balances.preview_funding_balance, Decimal::from(2_020));
        assert_eq!(balances.preview_reserve_balance, Decimal::new(-76_999, 2));
        assert_eq!(balances.client_funding_balance, Decimal::new(9_798, 2));
        assert_eq!(balances.funds_source, FundsSource::Live);
    }

    #[test]
    fn frozen_snapshot_beats_live_funds() {
        let request = soa(80_000).set_status(Status::Approved);
        let mut history = ApprovalHistory::new(&request.id);
        history.insert_entry(ApprovalHistoryEntry::new(
            &request.id,
            RequestKind::Soa,
            APPROVED_AT,
            "ae@example.com",
            json!({"client_funds": {"current_limit": 200_000, "funding_balance": 0}}),
        ));

        let balances =
            ClientBalances::calculate(&request, Decimal::ZERO, &history, Some(&funds()));

        assert_eq!(balances.funds_source, FundsSource::Frozen);
        assert_eq!(balances.client_limit, Decimal::from(200_000));
        assert_eq!(balances.client_funding_balance, Decimal::from(60));
    }

    #[test]
    fn reserve_release_uses_funds_only() {
        let request = Request::new(RequestKind::ReserveRelease, "client_1")
            .unwrap()
            .set_advance_amount(Decimal::from(5_000))
            .set_invoice_total(Decimal::from(7_000));
        let history = ApprovalHistory::new(&request.id);
        let balances = ClientBalances::calculate(
            &request,
            Decimal::from(9_000),
            &history,
            Some(&funds().set_ar_balance(Decimal::from(40))),
        );

        assert_eq!(balances.preview_ar_balance, Decimal::from(40));
        assert_eq!(balances.preview_funding_balance, Decimal::ZERO);
        assert_eq!(balances.client_funding_balance, Decimal::ONE_HUNDRED);
    }

    #[test]
    fn missing_funds_default_to_zero() {
        let history = ApprovalHistory::new("soa_1");
        let balances = ClientBalances::calculate(&soa(10), Decimal::ZERO, &history, None);
        assert_eq!(balances.funds_source, FundsSource::Missing);
        assert_eq!(balances.client_funding_balance, Decimal::ZERO);
        assert_eq!(balances.client_limit_flag().flag_type, FlagType::Error);
    }
}
