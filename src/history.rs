//! Append-only approval history, one ledger per request.
//!
//! Every state change appends one [`ApprovalHistoryEntry`] carrying a JSON
//! snapshot of the request and the client figures used at that moment.
//! Entries are never rewritten except to flag superseded `updated_at`
//! entries as deleted.
use serde_json::Value;
use sled::{Batch, Tree};
use tracing::debug;

use crate::error::ApprovalError;
use crate::funds::{ClientFunds, ClientSettings};
use crate::status::{RequestKind, Status};
use crate::utils::TimeStamp;

pub const CREATED_AT: &str = "created_at";
pub const CLIENT_CREATED_AT: &str = "client_created_at";
pub const CLIENT_SUBMISSION_AT: &str = "client_submission_at";
pub const UPDATED_AT: &str = "updated_at";
pub const SUBMITTED_AT: &str = "submitted_at";
pub const REVIEWED_AT: &str = "reviewed_at";
pub const APPROVED_AT: &str = "approved_at";
pub const REJECTED_AT: &str = "rejected_at";
pub const FUNDED_AT: &str = "funded_at";
pub const ACTION_REQUIRED: &str = "action_required";
pub const DELETED_AT: &str = "deleted_at";

const KEY_PREFIX: &str = "history:";

/// History key recorded when a request enters `status`.
pub fn key_for_status(status: Status) -> &'static str {
    match status {
        Status::Draft => CREATED_AT,
        Status::ClientDraft => CLIENT_CREATED_AT,
        Status::ClientSubmission => CLIENT_SUBMISSION_AT,
        Status::Pending | Status::Submitted => SUBMITTED_AT,
        Status::Reviewed => REVIEWED_AT,
        Status::Approved => APPROVED_AT,
        Status::Rejected => REJECTED_AT,
        Status::Completed => FUNDED_AT,
        Status::ActionRequired => ACTION_REQUIRED,
        Status::ActionRequiredByClient => "action_required_by_client",
        Status::PrincipalRejection => "principal_rejection_at",
    }
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalHistoryEntry {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub kind: RequestKind,
    #[n(2)]
    pub key: String,
    #[n(3)]
    pub value: TimeStamp,
    #[n(4)]
    pub user: String, // email of the acting user
    #[n(5)]
    #[cbor(with = "crate::utils::cbor_json")]
    pub attribute: Value,
    #[n(6)]
    pub is_deleted: bool,
    #[n(7)]
    pub deleted_at: Option<TimeStamp>,
}

impl ApprovalHistoryEntry {
    pub fn new(request_id: &str, kind: RequestKind, key: &str, user: &str, attribute: Value) -> Self {
        Self {
            request_id: request_id.to_string(),
            kind,
            key: key.to_string(),
            value: TimeStamp::new(),
            user: user.to_string(),
            attribute,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Content hash and CBOR encoding of the entry.
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    /// The attribute as an object. Older entries hold it as a JSON string.
    pub fn attribute_object(&self) -> Option<serde_json::Map<String, Value>> {
        match &self.attribute {
            Value::Object(map) => Some(map.clone()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
            _ => None,
        }
    }

    fn frozen<T: serde::de::DeserializeOwned>(&self, field: &str) -> Option<T> {
        let object = self.attribute_object()?;
        match object.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => serde_json::from_value(value.clone()).ok(),
        }
    }
}

/// The history of one request, in insertion order.
#[derive(Debug, Clone)]
pub struct ApprovalHistory {
    pub request_id: String,
    pub entries: Vec<ApprovalHistoryEntry>,
    // number of entries already persisted
    stored: usize,
}

impl ApprovalHistory {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            entries: vec![],
            stored: 0,
        }
    }

    pub fn insert_entry(&mut self, entry: ApprovalHistoryEntry) {
        self.entries.push(entry);
    }

    pub fn live_entries(&self) -> impl Iterator<Item = &ApprovalHistoryEntry> {
        self.entries.iter().filter(|entry| !entry.is_deleted)
    }

    pub fn count(&self, key: &str) -> usize {
        self.live_entries().filter(|entry| entry.key == key).count()
    }

    /// Most recent live entry recorded under `key`.
    pub fn latest(&self, key: &str) -> Option<&ApprovalHistoryEntry> {
        self.live_entries().filter(|entry| entry.key == key).last()
    }

    pub fn had_action_required(&self) -> bool {
        self.count(ACTION_REQUIRED) > 0
    }

    pub fn had_client_submitted(&self) -> bool {
        self.count(CLIENT_SUBMISSION_AT) > 0
    }

    pub fn is_request_updated(&self) -> bool {
        self.count(UPDATED_AT) > 0
    }

    /// Flags every live entry under `key` as deleted. Returns how many changed.
    pub fn soft_delete_key(&mut self, key: &str) -> usize {
        let now = TimeStamp::new();
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.is_deleted && e.key == key) {
            entry.is_deleted = true;
            entry.deleted_at = Some(now);
            changed += 1;
        }
        changed
    }

    // entry whose snapshot describes the request while it sits in `status`
    fn snapshot_entry(&self, status: Status, include_submitted: bool) -> Option<&ApprovalHistoryEntry> {
        match status {
            Status::Approved => self.latest(APPROVED_AT),
            Status::Completed => self.latest(FUNDED_AT),
            Status::Pending | Status::Reviewed if include_submitted => self.latest(SUBMITTED_AT),
            _ => None,
        }
    }

    /// Client funds frozen when the request was approved or funded.
    pub fn frozen_client_funds(&self, status: Status) -> Option<ClientFunds> {
        self.snapshot_entry(status, false)?.frozen("client_funds")
    }

    /// Client fee settings frozen at submission, approval or funding.
    pub fn frozen_client_settings(&self, status: Status) -> Option<ClientSettings> {
        self.snapshot_entry(status, true)?.frozen("client_settings")
    }

    fn entry_key(&self, seq: usize) -> String {
        format!("{KEY_PREFIX}{}:{seq:010}", self.request_id)
    }

    pub fn load(tree: &Tree, request_id: &str) -> Result<Self, ApprovalError> {
        let mut history = ApprovalHistory::new(request_id);
        let prefix = format!("{KEY_PREFIX}{request_id}:");
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let entry: ApprovalHistoryEntry = minicbor::decode(&value)?;
            history.entries.push(entry);
        }
        history.stored = history.entries.len();
        Ok(history)
    }

    /// Queues new entries and rewrites stored ones into `batch`.
    pub fn write_to(&self, batch: &mut Batch) -> anyhow::Result<()> {
        for (seq, entry) in self.entries.iter().enumerate() {
            let (hash, cbor) = entry.build()?;
            if seq >= self.stored {
                debug!(request_id = %self.request_id, key = %entry.key, %hash, "history entry appended");
            }
            batch.insert(self.entry_key(seq).as_bytes(), cbor);
        }
        Ok(())
    }

    /// Marks everything queued by [`write_to`](Self::write_to) as persisted.
    pub fn mark_stored(&mut self) {
        self.stored = self.entries.len();
    }
}
