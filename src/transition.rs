//! Role-gated status transitions, one declarative table per request kind
//! and role.
//!
//! A table lists the statuses a role may act on (`can_update`) and the
//! statuses it may never touch or move to (`cannot_update`). Rules then
//! adjust the denied set for the concrete (current, requested) pair before
//! the three checks in [`can_transition`] run:
//!
//! 1. current status denied and nothing requested: no permission to edit.
//! 2. current status editable and requested status denied: refused move.
//! 3. current status not editable and any status requested: refused.
//!
//! Rules only fire when a status is requested and the current status is
//! editable by the role.
use std::collections::BTreeSet;

use tracing::debug;

use crate::error::ApprovalError;
use crate::role::Role;
use crate::status::{RequestKind, Status};

/// Which requested statuses a rule reacts to.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Any,
    Is(Status),
    OneOf(&'static [Status]),
    SameAsCurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Deny(Status),
    Permit(Status),
    DenyRequested,
    PermitRequested,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// `None` matches every current status.
    pub current: Option<&'static [Status]>,
    pub requested: Target,
    pub effect: Effect,
}

impl Rule {
    const fn when(requested: Status, effect: Effect) -> Self {
        Rule {
            current: None,
            requested: Target::Is(requested),
            effect,
        }
    }
    const fn from(current: &'static [Status], requested: Target, effect: Effect) -> Self {
        Rule {
            current: Some(current),
            requested,
            effect,
        }
    }

    fn applies(&self, current: Status, requested: Status) -> bool {
        let current_matches = self.current.is_none_or(|set| set.contains(&current));
        let requested_matches = match self.requested {
            Target::Any => true,
            Target::Is(status) => status == requested,
            Target::OneOf(set) => set.contains(&requested),
            Target::SameAsCurrent => requested == current,
        };
        current_matches && requested_matches
    }
}

#[derive(Debug)]
pub struct RoleTable {
    pub can_update: &'static [Status],
    pub cannot_update: &'static [Status],
    pub rules: &'static [Rule],
}

impl RoleTable {
    /// The denied set after rules for this (current, requested) pair.
    pub fn denied_for(&self, current: Status, requested: Option<Status>) -> BTreeSet<Status> {
        let mut denied: BTreeSet<Status> = self.cannot_update.iter().copied().collect();

        let Some(requested) = requested else {
            return denied;
        };
        if !self.can_update.contains(&current) {
            return denied;
        }

        for rule in self.rules.iter().filter(|rule| rule.applies(current, requested)) {
            match rule.effect {
                Effect::Deny(status) => {
                    denied.insert(status);
                }
                Effect::Permit(status) => {
                    denied.remove(&status);
                }
                Effect::DenyRequested => {
                    denied.insert(requested);
                }
                Effect::PermitRequested => {
                    denied.remove(&requested);
                }
            }
        }
        denied
    }
}

use Effect::*;
use Status::*;

const NO_RULES: &[Rule] = &[];

// SOA and reserve release
static FUNDING_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[Draft, ActionRequired],
    cannot_update: &[
        PrincipalRejection,
        ActionRequiredByClient,
        Rejected,
        Pending,
        Reviewed,
        Approved,
        Completed,
    ],
    rules: &[
        Rule::when(Pending, Permit(Pending)),
        Rule::when(ActionRequired, Deny(ActionRequired)),
    ],
};

static FUNDING_AE: RoleTable = RoleTable {
    can_update: &[Pending, Reviewed],
    cannot_update: &[
        PrincipalRejection,
        ActionRequiredByClient,
        Draft,
        ActionRequired,
        Rejected,
        Approved,
        Completed,
    ],
    rules: &[
        Rule::when(Approved, Permit(Approved)),
        Rule::when(ActionRequired, Permit(ActionRequired)),
        Rule::when(Rejected, Permit(Rejected)),
        Rule::when(Pending, Deny(Pending)),
    ],
};

static FUNDING_BO: RoleTable = RoleTable {
    can_update: &[Approved],
    cannot_update: &[
        PrincipalRejection,
        ActionRequiredByClient,
        Draft,
        ActionRequired,
        Rejected,
        Pending,
        Reviewed,
        Completed,
    ],
    rules: &[
        Rule::when(Completed, Permit(Completed)),
        Rule::when(ActionRequired, Permit(ActionRequired)),
        Rule::when(Rejected, Permit(Rejected)),
    ],
};

static PAYEE_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[ClientSubmission, Draft, ActionRequired],
    cannot_update: &[
        ClientDraft,
        PrincipalRejection,
        ActionRequiredByClient,
        Rejected,
        Pending,
        Approved,
    ],
    rules: &[
        Rule::from(&[ClientSubmission, ActionRequired], Target::Any, Deny(Draft)),
        Rule::from(&[Draft, ActionRequired], Target::Any, Deny(ClientSubmission)),
        Rule::from(&[Draft, ClientSubmission], Target::Any, Deny(ActionRequired)),
        Rule::when(Pending, Permit(Pending)),
        Rule::from(
            &[ClientSubmission],
            Target::Is(ActionRequiredByClient),
            Permit(ActionRequiredByClient),
        ),
        Rule::from(
            &[ClientSubmission],
            Target::Is(PrincipalRejection),
            Permit(PrincipalRejection),
        ),
        Rule::when(ActionRequired, Deny(ActionRequired)),
    ],
};

// AE has no edit rights on payees at all
static PAYEE_AE: RoleTable = RoleTable {
    can_update: &[],
    cannot_update: &[
        ClientDraft,
        ClientSubmission,
        PrincipalRejection,
        ActionRequiredByClient,
        Draft,
        ActionRequired,
        Rejected,
        Pending,
        Approved,
    ],
    rules: NO_RULES,
};

static PAYEE_BO: RoleTable = RoleTable {
    can_update: &[Pending, Approved],
    cannot_update: &[
        ClientDraft,
        ClientSubmission,
        PrincipalRejection,
        ActionRequiredByClient,
        Draft,
        ActionRequired,
        Rejected,
    ],
    rules: &[
        Rule::when(Pending, Deny(Pending)),
        Rule::when(Approved, Permit(Approved)),
        Rule::from(&[Approved], Target::Is(Approved), Deny(Approved)),
        Rule {
            current: None,
            requested: Target::OneOf(&[Rejected, ActionRequired]),
            effect: PermitRequested,
        },
    ],
};

static DEBTOR_LIMIT_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[Draft],
    cannot_update: &[ClientDraft, ClientSubmission, Submitted, Rejected, Approved],
    rules: &[Rule::when(Submitted, Permit(Submitted))],
};

static DEBTOR_LIMIT_AE: RoleTable = RoleTable {
    can_update: &[ClientSubmission, Submitted],
    cannot_update: &[ClientDraft, Draft, Rejected, Approved],
    rules: &[
        Rule::when(Rejected, Permit(Rejected)),
        Rule::when(Approved, Permit(Approved)),
    ],
};

static DEBTOR_LIMIT_BO: RoleTable = RoleTable {
    can_update: &[],
    cannot_update: &[ClientDraft, ClientSubmission, Draft, Submitted, Rejected, Approved],
    rules: NO_RULES,
};

static GENERIC_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[Draft],
    cannot_update: &[Submitted, Rejected, Approved],
    rules: &[Rule::when(Submitted, Permit(Submitted))],
};

static GENERIC_AE: RoleTable = RoleTable {
    can_update: &[Submitted],
    cannot_update: &[Draft, Rejected, Approved],
    rules: &[
        Rule::from(&[Submitted], Target::Any, Deny(Submitted)),
        Rule::when(Rejected, Permit(Rejected)),
        Rule::when(Approved, Permit(Approved)),
    ],
};

static GENERIC_BO: RoleTable = RoleTable {
    can_update: &[],
    cannot_update: &[Draft, Submitted, Rejected, Approved],
    rules: NO_RULES,
};

static COMPLIANCE_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[Draft, ClientSubmission, Submitted],
    cannot_update: &[ClientDraft, PrincipalRejection, Submitted, Approved],
    rules: &[
        Rule {
            current: None,
            requested: Target::SameAsCurrent,
            effect: DenyRequested,
        },
        Rule::from(&[ClientSubmission], Target::Any, Deny(Draft)),
        Rule::from(
            &[ClientSubmission],
            Target::Is(PrincipalRejection),
            Permit(PrincipalRejection),
        ),
        Rule::when(Approved, Permit(Approved)),
        Rule::from(&[Draft], Target::Any, Deny(ClientSubmission)),
        Rule::from(&[Draft], Target::Is(Submitted), Permit(Submitted)),
    ],
};

// ae and bo only view compliance documents
static COMPLIANCE_VIEW_ONLY: RoleTable = RoleTable {
    can_update: &[],
    cannot_update: &[
        Draft,
        ClientDraft,
        ClientSubmission,
        PrincipalRejection,
        Submitted,
        Approved,
    ],
    rules: NO_RULES,
};

static NOTES_PRINCIPAL: RoleTable = RoleTable {
    can_update: &[Draft, ClientSubmission],
    cannot_update: &[ClientDraft, ClientSubmission, Submitted],
    rules: &[
        Rule::from(&[ClientSubmission], Target::Any, Deny(Draft)),
        Rule::from(&[Draft], Target::Is(Submitted), Permit(Submitted)),
    ],
};

static NOTES_VIEW_ONLY: RoleTable = RoleTable {
    can_update: &[],
    cannot_update: &[Draft, ClientDraft, ClientSubmission, Submitted],
    rules: NO_RULES,
};

/// The table for a kind and role. Clients have no staff table.
pub fn table_for(kind: RequestKind, role: Role) -> Option<&'static RoleTable> {
    let table = match (kind, role) {
        (_, Role::Client) => return None,
        (RequestKind::Soa | RequestKind::ReserveRelease, Role::Principal) => &FUNDING_PRINCIPAL,
        (RequestKind::Soa | RequestKind::ReserveRelease, Role::Ae) => &FUNDING_AE,
        (RequestKind::Soa | RequestKind::ReserveRelease, Role::Bo) => &FUNDING_BO,
        (RequestKind::Payee, Role::Principal) => &PAYEE_PRINCIPAL,
        (RequestKind::Payee, Role::Ae) => &PAYEE_AE,
        (RequestKind::Payee, Role::Bo) => &PAYEE_BO,
        (RequestKind::DebtorLimitApprovals, Role::Principal) => &DEBTOR_LIMIT_PRINCIPAL,
        (RequestKind::DebtorLimitApprovals, Role::Ae) => &DEBTOR_LIMIT_AE,
        (RequestKind::DebtorLimitApprovals, Role::Bo) => &DEBTOR_LIMIT_BO,
        (RequestKind::GenericRequest, Role::Principal) => &GENERIC_PRINCIPAL,
        (RequestKind::GenericRequest, Role::Ae) => &GENERIC_AE,
        (RequestKind::GenericRequest, Role::Bo) => &GENERIC_BO,
        (RequestKind::ComplianceRepository, Role::Principal) => &COMPLIANCE_PRINCIPAL,
        (RequestKind::ComplianceRepository, Role::Ae | Role::Bo) => &COMPLIANCE_VIEW_ONLY,
        (
            RequestKind::CollectionNotes | RequestKind::VerificationNotes,
            Role::Principal,
        ) => &NOTES_PRINCIPAL,
        (RequestKind::CollectionNotes | RequestKind::VerificationNotes, Role::Ae | Role::Bo) => {
            &NOTES_VIEW_ONLY
        }
    };
    Some(table)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    pub fn into_result(self) -> Result<(), ApprovalError> {
        if self.allowed {
            Ok(())
        } else {
            Err(ApprovalError::PermissionDenied(self.reason))
        }
    }
}

/// Decides whether `role` may act on a request of `kind` sitting in
/// `current`, optionally moving it to `requested`.
///
/// Identity moves are not special-cased: a role asking for the status the
/// request already holds gets the same answer any other target would.
pub fn can_transition(
    kind: RequestKind,
    role: Role,
    current: Status,
    requested: Option<Status>,
) -> Decision {
    let subject = format!("{} having status {}", kind.label(), current);
    let target = requested.map(|s| format!(" to {s}")).unwrap_or_default();

    let Some(table) = table_for(kind, role) else {
        return Decision {
            allowed: false,
            reason: format!("{role} is not permitted to update {subject}{target}"),
        };
    };

    let denied = table.denied_for(current, requested);
    let editable = table.can_update.contains(&current);

    let refused = match requested {
        None => denied.contains(&current),
        Some(requested) => !editable || denied.contains(&requested),
    };

    let decision = if refused {
        Decision {
            allowed: false,
            reason: format!("{role} doesn't have permission for updating {subject}{target}"),
        }
    } else {
        Decision {
            allowed: true,
            reason: format!("{role} has permission for updating {subject}{target}"),
        }
    };

    debug!(
        kind = kind.label(),
        role = role.as_str(),
        current = current.as_str(),
        requested = requested.map(|s| s.as_str()),
        allowed = decision.allowed,
        "transition checked"
    );
    decision
}

/// How a role relates to a status before any target is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The role never moves a request out of this status.
    AlwaysDenied,
    /// The role may act here, subject to the requested status.
    Conditional,
}

pub fn access(kind: RequestKind, role: Role, status: Status) -> Access {
    match table_for(kind, role) {
        Some(table) if table.can_update.contains(&status) => Access::Conditional,
        _ => Access::AlwaysDenied,
    }
}

/// Targets within the kind's vocabulary that `role` may move `current` to.
pub fn allowed_targets(kind: RequestKind, role: Role, current: Status) -> Vec<Status> {
    kind.statuses()
        .iter()
        .copied()
        .filter(|target| can_transition(kind, role, current, Some(*target)).allowed)
        .collect()
}
