//! Service layer API for request workflow operations
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use sled::{Batch, Db};
use tracing::{info, warn};

use crate::balances::{ClientBalances, LimitFlag};
use crate::config::ServiceConfig;
use crate::error::ApprovalError;
use crate::escalation::{EscalationInput, EscalationOutcome, EscalationResolver};
use crate::fees::{Disbursement, DisbursementFees, FeeSchedule, calculate_fees};
use crate::funds::{ClientFunds, ClientSettings};
use crate::gateway::{PermissionsGateway, UserContact};
use crate::history::{
    ApprovalHistory, ApprovalHistoryEntry, CLIENT_SUBMISSION_AT, CREATED_AT, DELETED_AT, UPDATED_AT,
    key_for_status,
};
use crate::notify::{Mailer, NotificationDispatcher, TransitionNotice};
use crate::request::{Request, RequestUpdate};
use crate::role::{Role, RolePermissionBundle};
use crate::status::{RequestKind, Status};
use crate::transition::can_transition;
use crate::utils::{TimeStamp, new_uuid_to_bech32};

const REQUEST_PREFIX: &str = "request:";
const FUNDS_PREFIX: &str = "client_funds:";
const SETTINGS_PREFIX: &str = "client_settings:";
const DISBURSEMENT_PREFIX: &str = "disbursement:";

/// The caller behind an auth token, resolved once per operation.
struct Caller {
    role: Role,
    bundle: RolePermissionBundle,
    profile: UserContact,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalResult {
    pub request: Request,
    /// Present for SOA and reserve release, which go through escalation.
    pub escalation: Option<EscalationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePreview {
    pub balances: ClientBalances,
    pub client_limit_flag: LimitFlag,
}

pub struct ApprovalService {
    instance: Arc<Db>,
    gateway: Arc<dyn PermissionsGateway>,
    notifier: NotificationDispatcher,
    resolver: EscalationResolver,
}

impl ApprovalService {
    pub fn new(
        instance: Arc<Db>,
        gateway: Arc<dyn PermissionsGateway>,
        mailer: Arc<dyn Mailer>,
        config: &ServiceConfig,
    ) -> Self {
        let notifier = NotificationDispatcher::new(mailer, Arc::clone(&gateway), config.mail.clone());
        Self {
            instance,
            gateway,
            notifier,
            resolver: EscalationResolver::new(config.limits.clone()),
        }
    }

    /// Opens the sled database named in the storage section.
    pub fn open(
        config: &ServiceConfig,
        gateway: Arc<dyn PermissionsGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let db = sled::open(&config.storage.path)?;
        Ok(Self::new(Arc::new(db), gateway, mailer, config))
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    fn caller(&self, token: &str) -> anyhow::Result<Caller> {
        let bundle = self.gateway.resolve(token)?;
        let role = bundle.role()?;
        let profile = self.gateway.user_profile(token)?;
        Ok(Caller {
            role,
            bundle,
            profile,
        })
    }

    pub fn put_client_funds(&self, funds: &ClientFunds) -> anyhow::Result<()> {
        let key = format!("{FUNDS_PREFIX}{}", funds.client_id);
        self.instance.insert(key.as_bytes(), serde_json::to_vec(funds)?)?;
        Ok(())
    }

    pub fn client_funds(&self, client_id: &str) -> anyhow::Result<Option<ClientFunds>> {
        let key = format!("{FUNDS_PREFIX}{client_id}");
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_client_settings(&self, settings: &ClientSettings) -> anyhow::Result<()> {
        let key = format!("{SETTINGS_PREFIX}{}", settings.client_id);
        self.instance.insert(key.as_bytes(), serde_json::to_vec(settings)?)?;
        Ok(())
    }

    pub fn client_settings(&self, client_id: &str) -> anyhow::Result<Option<ClientSettings>> {
        let key = format!("{SETTINGS_PREFIX}{client_id}");
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a live request from the database
    pub fn load(&self, request_id: &str) -> anyhow::Result<Request> {
        let key = format!("{REQUEST_PREFIX}{request_id}");
        let bytes = self
            .instance
            .get(key.as_bytes())?
            .ok_or_else(|| ApprovalError::NotFound(format!("Request {request_id}")))?;
        let request: Request = minicbor::decode(&bytes)?;
        if request.is_deleted {
            return Err(ApprovalError::NotFound(format!("Request {request_id}")).into());
        }
        Ok(request)
    }

    pub fn history(&self, request_id: &str) -> anyhow::Result<ApprovalHistory> {
        Ok(ApprovalHistory::load(&self.instance, request_id)?)
    }

    pub fn disbursements(&self, request_id: &str) -> anyhow::Result<Vec<Disbursement>> {
        let prefix = format!("{DISBURSEMENT_PREFIX}{request_id}:");
        let mut disbursements = vec![];
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let disbursement: Disbursement = minicbor::decode(&value)?;
            if !disbursement.is_deleted {
                disbursements.push(disbursement);
            }
        }
        Ok(disbursements)
    }

    /// Create a new request in draft
    pub fn create_request(&self, token: &str, request: Request) -> anyhow::Result<Request> {
        let caller = self.caller(token)?;
        let initial = request.kind.initial_status();
        if request.status != initial {
            return Err(ApprovalError::Validation(format!(
                "a new {} request must start as {initial}, not {}",
                request.kind.label(),
                request.status
            ))
            .into());
        }
        can_transition(request.kind, caller.role, request.status, None).into_result()?;
        request.validate()?;

        let mut request = request.set_created_by(&caller.profile.email);
        let mut history = ApprovalHistory::new(&request.id);
        self.refresh_amounts(&mut request, &history)?;

        self.record(&mut history, &request, CREATED_AT, &caller)?;
        self.persist(&request, &mut history, Batch::default())?;

        info!(request_id = %request.id, kind = request.kind.label(), "request created");
        Ok(request)
    }

    /// Edit request fields without moving its status
    pub fn update_request(
        &self,
        token: &str,
        request_id: &str,
        update: &RequestUpdate,
    ) -> anyhow::Result<Request> {
        let caller = self.caller(token)?;
        let mut request = self.load(request_id)?;
        let mut history = self.history(request_id)?;
        can_transition(request.kind, caller.role, request.status, None).into_result()?;

        if request.kind.is_funding() && update.enables_high_priority(&request) {
            self.check_high_priority(&request, update, &history)?;
        }

        let changed = request.apply(update);
        request.validate()?;
        if !changed {
            return Ok(request);
        }
        self.refresh_amounts(&mut request, &history)?;

        // only the first AE edit of a submitted request is recorded
        let reviewing = matches!(request.status, Status::Pending | Status::Reviewed);
        if caller.role == Role::Ae && reviewing && !history.is_request_updated() {
            self.record(&mut history, &request, UPDATED_AT, &caller)?;
        }
        self.persist(&request, &mut history, Batch::default())?;

        info!(request_id, "request updated");
        Ok(request)
    }

    /// Adds a payee disbursement to a funding request
    pub fn add_disbursement(
        &self,
        token: &str,
        request_id: &str,
        mut disbursement: Disbursement,
    ) -> anyhow::Result<Disbursement> {
        let caller = self.caller(token)?;
        let mut request = self.load(request_id)?;
        let mut history = self.history(request_id)?;
        if !request.kind.is_funding() {
            return Err(ApprovalError::Validation(format!(
                "{} requests carry no disbursements",
                request.kind.label()
            ))
            .into());
        }
        can_transition(request.kind, caller.role, request.status, None).into_result()?;

        disbursement.id = new_uuid_to_bech32("disb_")?;
        disbursement.request_id = request.id.clone();
        disbursement.client_id = request.client_id.clone();

        let mut batch = Batch::default();
        batch.insert(
            format!("{DISBURSEMENT_PREFIX}{}:{}", request.id, disbursement.id).as_bytes(),
            minicbor::to_vec(&disbursement)?,
        );

        let mut disbursements = self.disbursements(request_id)?;
        disbursements.push(disbursement.clone());
        self.refresh_amounts_with(&mut request, &history, &disbursements)?;
        self.persist(&request, &mut history, batch)?;

        Ok(disbursement)
    }

    /// Principal submits a draft or corrected request
    pub fn submit(&self, token: &str, request_id: &str) -> anyhow::Result<Request> {
        let kind = self.load(request_id)?.kind;
        let target = match kind {
            RequestKind::Soa | RequestKind::ReserveRelease | RequestKind::Payee => Status::Pending,
            _ => Status::Submitted,
        };
        self.transition(token, request_id, target)
    }

    /// AE approval. Funding requests go through the escalation resolver and
    /// may end up reviewed instead of approved.
    pub fn approve(&self, token: &str, request_id: &str) -> anyhow::Result<ApprovalResult> {
        let caller = self.caller(token)?;
        let mut request = self.load(request_id)?;
        if !request.kind.is_funding() {
            let request = self.move_to(&caller, token, request, Status::Approved)?;
            return Ok(ApprovalResult {
                request,
                escalation: None,
            });
        }

        let mut history = self.history(request_id)?;
        can_transition(request.kind, caller.role, request.status, Some(Status::Approved))
            .into_result()?;

        let limit = caller.bundle.ae_approval_limit();
        if request.status == Status::Reviewed && request.disbursement_amount > limit {
            return Err(ApprovalError::AlreadyReviewed.into());
        }

        let input = EscalationInput::from_bundle(
            &caller.bundle,
            request.disbursement_amount,
            history.had_action_required(),
            history.is_request_updated(),
        );
        let outcome = self.resolver.resolve(&input);

        let mut status = outcome.status;
        if outcome.is_approved() {
            history.soft_delete_key(UPDATED_AT);
            // nothing left to pay out, so there is nothing for back office to fund
            if request.disbursement_amount.is_zero() {
                status = Status::Completed;
            }
        }

        request.status = status;
        request.last_processed_at = Some(TimeStamp::new());
        self.record(&mut history, &request, key_for_status(status), &caller)?;
        self.persist(&request, &mut history, Batch::default())?;

        info!(request_id, status = status.as_str(), "approval processed");
        if outcome.is_approved() {
            self.notify(&caller, token, &request, &history);
        } else {
            self.notifier
                .notify_review(&outcome.notices, &request, token, &caller.profile);
        }

        Ok(ApprovalResult {
            request,
            escalation: Some(outcome),
        })
    }

    /// Send a request back for correction
    pub fn send_back(&self, token: &str, request_id: &str) -> anyhow::Result<Request> {
        self.transition(token, request_id, Status::ActionRequired)
    }

    pub fn reject(&self, token: &str, request_id: &str) -> anyhow::Result<Request> {
        self.transition(token, request_id, Status::Rejected)
    }

    /// Back office marks an approved request as funded
    pub fn fund(&self, token: &str, request_id: &str) -> anyhow::Result<Request> {
        self.transition(token, request_id, Status::Completed)
    }

    /// Moves a request to `target` after the transition check.
    pub fn transition(&self, token: &str, request_id: &str, target: Status) -> anyhow::Result<Request> {
        let caller = self.caller(token)?;
        let request = self.load(request_id)?;
        self.move_to(&caller, token, request, target)
    }

    /// Soft delete, allowed wherever the caller may edit the request
    pub fn delete_request(&self, token: &str, request_id: &str) -> anyhow::Result<()> {
        let caller = self.caller(token)?;
        let mut request = self.load(request_id)?;
        let mut history = self.history(request_id)?;
        can_transition(request.kind, caller.role, request.status, None).into_result()?;

        request.is_deleted = true;
        request.deleted_at = Some(TimeStamp::new());
        self.record(&mut history, &request, DELETED_AT, &caller)?;
        self.persist(&request, &mut history, Batch::default())?;

        info!(request_id, "request deleted");
        Ok(())
    }

    /// COC1 to COC5 for a request. `invoice_total` stands in for the stored
    /// invoice total while an SOA is in draft.
    pub fn preview_balances(
        &self,
        request_id: &str,
        invoice_total: Decimal,
    ) -> anyhow::Result<BalancePreview> {
        let request = self.load(request_id)?;
        let history = self.history(request_id)?;
        let live = self.client_funds(&request.client_id)?;

        let balances = ClientBalances::calculate(&request, invoice_total, &history, live.as_ref());
        let client_limit_flag = balances.client_limit_flag();
        Ok(BalancePreview {
            balances,
            client_limit_flag,
        })
    }

    pub fn disbursement_fees(&self, request_id: &str) -> anyhow::Result<DisbursementFees> {
        let request = self.load(request_id)?;
        let history = self.history(request_id)?;
        let disbursements = self.disbursements(request_id)?;
        self.fees_for(&request, &history, &disbursements, request.high_priority)
    }

    fn fee_schedule(&self, request: &Request, history: &ApprovalHistory) -> anyhow::Result<FeeSchedule> {
        let settings = match history.frozen_client_settings(request.status) {
            Some(frozen) => Some(frozen),
            None => self.client_settings(&request.client_id)?,
        };
        Ok(FeeSchedule::for_client(settings.as_ref()))
    }

    fn fees_for(
        &self,
        request: &Request,
        history: &ApprovalHistory,
        disbursements: &[Disbursement],
        high_priority: bool,
    ) -> anyhow::Result<DisbursementFees> {
        let schedule = self.fee_schedule(request, history)?;
        Ok(calculate_fees(
            &schedule,
            disbursements,
            high_priority,
            request.advance_amount,
            request.advance_subtotal(),
        ))
    }

    fn check_high_priority(
        &self,
        request: &Request,
        update: &RequestUpdate,
        history: &ApprovalHistory,
    ) -> anyhow::Result<()> {
        let mut edited = request.clone();
        edited.apply(update);
        let disbursements = self.disbursements(&request.id)?;
        let fees = self.fees_for(&edited, history, &disbursements, false)?;
        if fees.outstanding_amount - fees.high_priority_amount < Decimal::ZERO {
            warn!(request_id = %request.id, outstanding = %fees.outstanding_amount, "high priority refused");
            return Err(ApprovalError::InsufficientOutstanding.into());
        }
        Ok(())
    }

    fn refresh_amounts(&self, request: &mut Request, history: &ApprovalHistory) -> anyhow::Result<()> {
        if !request.kind.is_funding() {
            return Ok(());
        }
        let disbursements = self.disbursements(&request.id)?;
        self.refresh_amounts_with(request, history, &disbursements)
    }

    fn refresh_amounts_with(
        &self,
        request: &mut Request,
        history: &ApprovalHistory,
        disbursements: &[Disbursement],
    ) -> anyhow::Result<()> {
        let fees = self.fees_for(request, history, disbursements, request.high_priority)?;
        request.disbursement_amount = fees.disbursement_amount;
        Ok(())
    }

    fn move_to(
        &self,
        caller: &Caller,
        token: &str,
        mut request: Request,
        target: Status,
    ) -> anyhow::Result<Request> {
        can_transition(request.kind, caller.role, request.status, Some(target)).into_result()?;
        let mut history = self.history(&request.id)?;

        let from = request.status;
        request.status = target;
        request.last_processed_at = Some(TimeStamp::new());
        self.record(&mut history, &request, key_for_status(target), caller)?;
        self.persist(&request, &mut history, Batch::default())?;

        info!(request_id = %request.id, from = from.as_str(), to = target.as_str(), "status changed");
        self.notify(caller, token, &request, &history);
        Ok(request)
    }

    fn notify(&self, caller: &Caller, token: &str, request: &Request, history: &ApprovalHistory) {
        let client_submitter = history.latest(CLIENT_SUBMISSION_AT).map(|entry| entry.user.as_str());
        self.notifier.notify_transition(&TransitionNotice {
            request,
            status: request.status,
            token,
            actor: &caller.profile,
            actor_role: caller.role,
            organization_access: &caller.bundle.organization_access,
            client_submitter,
        });
    }

    /// Appends a history entry snapshotting the request and the client
    /// figures in force right now.
    fn record(
        &self,
        history: &mut ApprovalHistory,
        request: &Request,
        key: &str,
        caller: &Caller,
    ) -> anyhow::Result<()> {
        let client_funds = self.client_funds(&request.client_id)?;
        let client_settings = self.client_settings(&request.client_id)?;
        let disbursements = if request.kind.is_funding() {
            self.disbursements(&request.id)?
        } else {
            vec![]
        };

        let attribute: Value = json!({
            "request": request.snapshot()?,
            "client_funds": client_funds,
            "client_settings": client_settings,
            "disbursements": disbursements,
            "user_role": caller.role.as_str(),
        });
        history.insert_entry(ApprovalHistoryEntry::new(
            &request.id,
            request.kind,
            key,
            &caller.profile.email,
            attribute,
        ));
        Ok(())
    }

    fn persist(
        &self,
        request: &Request,
        history: &mut ApprovalHistory,
        mut batch: Batch,
    ) -> anyhow::Result<()> {
        batch.insert(
            format!("{REQUEST_PREFIX}{}", request.id).as_bytes(),
            minicbor::to_vec(request)?,
        );
        history.write_to(&mut batch)?;
        self.instance.apply_batch(batch)?;
        history.mark_stored();
        Ok(())
    }
}
