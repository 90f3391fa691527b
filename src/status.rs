//! Request variants and the status vocabulary they move through
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApprovalError;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[n(0)]
    Draft,
    #[n(1)]
    ActionRequired,
    #[n(2)]
    ActionRequiredByClient,
    #[n(3)]
    ClientDraft,
    #[n(4)]
    ClientSubmission,
    #[n(5)]
    PrincipalRejection,
    #[n(6)]
    Rejected,
    #[n(7)]
    Pending,
    #[n(8)]
    Reviewed,
    #[n(9)]
    Approved,
    #[n(10)]
    Completed,
    #[n(11)]
    Submitted,
}

impl Status {
    pub const ALL: [Status; 12] = [
        Status::Draft,
        Status::ActionRequired,
        Status::ActionRequiredByClient,
        Status::ClientDraft,
        Status::ClientSubmission,
        Status::PrincipalRejection,
        Status::Rejected,
        Status::Pending,
        Status::Reviewed,
        Status::Approved,
        Status::Completed,
        Status::Submitted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::ActionRequired => "action_required",
            Status::ActionRequiredByClient => "action_required_by_client",
            Status::ClientDraft => "client_draft",
            Status::ClientSubmission => "client_submission",
            Status::PrincipalRejection => "principal_rejection",
            Status::Rejected => "rejected",
            Status::Pending => "pending",
            Status::Reviewed => "reviewed",
            Status::Approved => "approved",
            Status::Completed => "completed",
            Status::Submitted => "submitted",
        }
    }

    /// Statuses in which the client, not staff, holds the request.
    pub fn is_client_owned(&self) -> bool {
        matches!(
            self,
            Status::ClientDraft | Status::ClientSubmission | Status::ActionRequiredByClient
        )
    }
}

impl FromStr for Status {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ApprovalError::Validation(format!("unknown status '{s}'")))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[n(0)]
    Soa,
    #[n(1)]
    ReserveRelease,
    #[n(2)]
    Payee,
    #[n(3)]
    DebtorLimitApprovals,
    #[n(4)]
    GenericRequest,
    #[n(5)]
    ComplianceRepository,
    #[n(6)]
    CollectionNotes,
    #[n(7)]
    VerificationNotes,
}

const FUNDING_STATUSES: &[Status] = &[
    Status::Draft,
    Status::ActionRequired,
    Status::ActionRequiredByClient,
    Status::ClientSubmission,
    Status::ClientDraft,
    Status::PrincipalRejection,
    Status::Rejected,
    Status::Pending,
    Status::Reviewed,
    Status::Approved,
    Status::Completed,
    Status::Submitted,
];

const PAYEE_STATUSES: &[Status] = &[
    Status::Draft,
    Status::ActionRequired,
    Status::ActionRequiredByClient,
    Status::ClientSubmission,
    Status::ClientDraft,
    Status::PrincipalRejection,
    Status::Rejected,
    Status::Pending,
    Status::Approved,
];

const DEBTOR_LIMIT_STATUSES: &[Status] = &[
    Status::ClientDraft,
    Status::ClientSubmission,
    Status::Draft,
    Status::Submitted,
    Status::Rejected,
    Status::Approved,
];

const GENERIC_STATUSES: &[Status] = &[
    Status::Draft,
    Status::Submitted,
    Status::Rejected,
    Status::Approved,
];

const COMPLIANCE_STATUSES: &[Status] = &[
    Status::Draft,
    Status::ClientDraft,
    Status::ClientSubmission,
    Status::PrincipalRejection,
    Status::Submitted,
    Status::Approved,
];

const NOTES_STATUSES: &[Status] = &[
    Status::Draft,
    Status::ClientDraft,
    Status::ClientSubmission,
    Status::Submitted,
];

impl RequestKind {
    pub const ALL: [RequestKind; 8] = [
        RequestKind::Soa,
        RequestKind::ReserveRelease,
        RequestKind::Payee,
        RequestKind::DebtorLimitApprovals,
        RequestKind::GenericRequest,
        RequestKind::ComplianceRepository,
        RequestKind::CollectionNotes,
        RequestKind::VerificationNotes,
    ];

    /// Every status a request of this kind can hold.
    pub fn statuses(&self) -> &'static [Status] {
        match self {
            RequestKind::Soa | RequestKind::ReserveRelease => FUNDING_STATUSES,
            RequestKind::Payee => PAYEE_STATUSES,
            RequestKind::DebtorLimitApprovals => DEBTOR_LIMIT_STATUSES,
            RequestKind::GenericRequest => GENERIC_STATUSES,
            RequestKind::ComplianceRepository => COMPLIANCE_STATUSES,
            RequestKind::CollectionNotes | RequestKind::VerificationNotes => NOTES_STATUSES,
        }
    }

    /// Statuses after which no role acts on the request again.
    pub fn terminal_statuses(&self) -> &'static [Status] {
        match self {
            RequestKind::Soa | RequestKind::ReserveRelease => &[
                Status::PrincipalRejection,
                Status::Rejected,
                Status::Completed,
                Status::Submitted,
            ],
            RequestKind::Payee => &[Status::PrincipalRejection, Status::Rejected],
            RequestKind::DebtorLimitApprovals | RequestKind::GenericRequest => {
                &[Status::Rejected, Status::Approved]
            }
            RequestKind::ComplianceRepository => &[Status::PrincipalRejection, Status::Approved],
            RequestKind::CollectionNotes | RequestKind::VerificationNotes => &[Status::Submitted],
        }
    }

    /// Prefix used in permission messages and mail subjects.
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Soa => "SOA",
            RequestKind::ReserveRelease => "Reserve Release",
            RequestKind::Payee => "Payee",
            RequestKind::DebtorLimitApprovals => "CL",
            RequestKind::GenericRequest => "GN",
            RequestKind::ComplianceRepository => "CR",
            RequestKind::CollectionNotes => "CN",
            RequestKind::VerificationNotes => "VN",
        }
    }

    /// bech32 human readable part for generated ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            RequestKind::Soa => "soa_",
            RequestKind::ReserveRelease => "rr_",
            RequestKind::Payee => "payee_",
            RequestKind::DebtorLimitApprovals => "cl_",
            RequestKind::GenericRequest => "gn_",
            RequestKind::ComplianceRepository => "cr_",
            RequestKind::CollectionNotes => "cn_",
            RequestKind::VerificationNotes => "vn_",
        }
    }

    /// SOA and reserve release carry money and go through escalation.
    pub fn is_funding(&self) -> bool {
        matches!(self, RequestKind::Soa | RequestKind::ReserveRelease)
    }

    /// The status a principal-created request starts in.
    pub fn initial_status(&self) -> Status {
        Status::Draft
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
