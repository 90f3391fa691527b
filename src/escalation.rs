//! Decides whether an AE approval finalises a funding request or has to be
//! escalated to a higher approval tier, and which reviewers hear about it.
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::gateway::PermissionFilter;
use crate::role::{ApprovalTiers, RolePermissionBundle};
use crate::status::Status;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationInput {
    pub disbursement_amount: Decimal,
    pub approval_limit: Decimal,
    /// The request was sent back for correction at some point.
    pub has_action_required: bool,
    pub override_action_required: bool,
    pub has_can_modify_permission: bool,
    /// The approving AE edited the request after it was submitted.
    pub is_request_updated: bool,
    pub organization_access: Vec<String>,
}

impl EscalationInput {
    pub fn from_bundle(
        bundle: &RolePermissionBundle,
        disbursement_amount: Decimal,
        has_action_required: bool,
        is_request_updated: bool,
    ) -> Self {
        Self {
            disbursement_amount,
            approval_limit: bundle.ae_approval_limit(),
            has_action_required,
            override_action_required: bundle.misc_permissions.override_action_required,
            has_can_modify_permission: bundle.misc_permissions.can_modify,
            is_request_updated,
            organization_access: bundle.organization_access.clone(),
        }
    }

    /// Callers without `can_modify` may only approve requests they left untouched.
    pub fn can_modify_requests(&self) -> bool {
        self.has_can_modify_permission || !self.is_request_updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerTier {
    RelationshipManager,
    FactoringOperationsManager,
    ChiefOperatingOfficer,
    ChiefRiskOfficer,
    CanModify,
}

impl ReviewerTier {
    /// Who to look up in the permission service for this tier.
    pub fn filter(&self, tiers: &ApprovalTiers, organization_access: &[String]) -> PermissionFilter {
        let orgs = organization_access.to_vec();
        match self {
            ReviewerTier::RelationshipManager => PermissionFilter::require_all()
                .include("approval_limit", vec![tiers.rm.to_string()])
                .include("app_flow", vec!["ae".into()])
                .include("organization_access", orgs),
            ReviewerTier::FactoringOperationsManager => PermissionFilter::require_all()
                .include("approval_limit", vec![tiers.fom.to_string()])
                .include("app_flow", vec!["ae".into()])
                .include("organization_access", orgs)
                .exclude("misc_permissions", vec!["override_action_required".into()]),
            ReviewerTier::ChiefOperatingOfficer => PermissionFilter::require_all()
                .include("approval_limit", vec![tiers.coo.to_string()])
                .include("app_flow", vec!["ae".into()])
                .include("misc_permissions", vec!["override_action_required".into()])
                .include("organization_access", orgs),
            // the CRO sees every organisation
            ReviewerTier::ChiefRiskOfficer => PermissionFilter::require_all()
                .include("approval_limit", vec![tiers.cro.to_string()])
                .include("app_flow", vec!["ae".into()])
                .include("misc_permissions", vec!["override_action_required".into()]),
            ReviewerTier::CanModify => PermissionFilter::require_all()
                .include("misc_permissions", vec!["can_modify".into()])
                .include("app_flow", vec!["ae".into()])
                .include("organization_access", orgs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewNotice {
    pub tier: ReviewerTier,
    pub filter: PermissionFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationOutcome {
    pub status: Status,
    pub approval_limit: Decimal,
    pub disbursement_amount: Decimal,
    pub exception: bool,
    pub action_required: bool,
    pub can_modify_requests: bool,
    pub has_can_modify_permission: bool,
    pub is_request_updated: bool,
    #[serde(skip)]
    pub notices: Vec<ReviewNotice>,
}

impl EscalationOutcome {
    pub fn is_approved(&self) -> bool {
        self.status == Status::Approved
    }

    /// The approval tier that was notified, if any tier matched.
    pub fn tier(&self) -> Option<ReviewerTier> {
        self.notices
            .iter()
            .map(|notice| notice.tier)
            .find(|tier| *tier != ReviewerTier::CanModify)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationResolver {
    pub tiers: ApprovalTiers,
}

impl EscalationResolver {
    pub fn new(tiers: ApprovalTiers) -> Self {
        Self { tiers }
    }

    pub fn resolve(&self, input: &EscalationInput) -> EscalationOutcome {
        let tiers = &self.tiers;
        let amount = input.disbursement_amount;
        let limit = input.approval_limit;
        let can_modify_requests = input.can_modify_requests();
        let can_approve = amount <= limit && can_modify_requests;

        let normal = !input.has_action_required && can_approve;
        let coo = input.override_action_required && limit == tiers.coo && can_approve;
        // the top tier with override approves whatever the amount
        let cro = input.override_action_required && limit == tiers.cro;
        let override_case = input.override_action_required && can_approve;

        debug!(
            %amount,
            %limit,
            normal,
            coo,
            cro,
            override_case,
            can_modify_requests,
            "approval cases evaluated"
        );

        let exception = !(normal || coo || cro || override_case);
        let notices = if exception {
            self.review_notices(input)
        } else {
            Vec::new()
        };

        let outcome = EscalationOutcome {
            status: if exception {
                Status::Reviewed
            } else {
                Status::Approved
            },
            approval_limit: limit,
            disbursement_amount: amount,
            exception,
            action_required: input.has_action_required,
            can_modify_requests,
            has_can_modify_permission: input.has_can_modify_permission,
            is_request_updated: input.is_request_updated,
            notices,
        };

        info!(
            status = outcome.status.as_str(),
            exception,
            tier = ?outcome.tier(),
            "escalation resolved"
        );
        outcome
    }

    /// At most one approval tier, then the `can_modify` reviewers.
    fn review_notices(&self, input: &EscalationInput) -> Vec<ReviewNotice> {
        let mut notices = Vec::with_capacity(2);
        if let Some(tier) = self.matching_tier(input) {
            notices.push(ReviewNotice {
                tier,
                filter: tier.filter(&self.tiers, &input.organization_access),
            });
        }
        notices.push(ReviewNotice {
            tier: ReviewerTier::CanModify,
            filter: ReviewerTier::CanModify.filter(&self.tiers, &input.organization_access),
        });
        notices
    }

    fn matching_tier(&self, input: &EscalationInput) -> Option<ReviewerTier> {
        let tiers = &self.tiers;
        let amount = input.disbursement_amount;
        let limit = input.approval_limit;
        let action_required = input.has_action_required;

        if action_required && amount > tiers.jam && amount <= tiers.rm && limit == tiers.jam {
            return Some(ReviewerTier::RelationshipManager);
        }
        if !action_required
            && amount > tiers.jam
            && amount <= tiers.fom
            && (limit == tiers.jam || limit == tiers.rm)
        {
            return Some(ReviewerTier::FactoringOperationsManager);
        }
        if action_required && amount <= tiers.coo {
            return Some(ReviewerTier::ChiefOperatingOfficer);
        }
        if amount > tiers.coo {
            return Some(ReviewerTier::ChiefRiskOfficer);
        }
        None
    }
}
