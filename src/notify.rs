//! Mail fan-out for status changes and escalation reviews.
//!
//! Recipients are looked up synchronously through the permissions gateway;
//! delivery happens on a detached thread and failures are only logged, so a
//! mail outage never blocks a transition.
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::MailConfig;
use crate::error::ApprovalError;
use crate::escalation::ReviewNotice;
use crate::gateway::{PermissionFilter, PermissionsGateway, UserContact};
use crate::request::Request;
use crate::role::Role;
use crate::status::Status;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecipient {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub sender_email: String,
    pub sender_name: String,
    pub recipients: Vec<MailRecipient>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub template_name: String,
    pub template_data: Value,
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), ApprovalError>;
}

/// Posts messages to the mail provider endpoint.
pub struct HttpMailer {
    client: Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Result<Self, ApprovalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApprovalError::Upstream {
                status: 500,
                msg: e.to_string(),
            })?;
        Ok(Self { client, config })
    }
}

impl Mailer for HttpMailer {
    fn send(&self, message: &MailMessage) -> Result<(), ApprovalError> {
        if self.config.url.is_empty() {
            debug!(subject = %message.subject, "mail url not configured, skipping delivery");
            return Ok(());
        }
        let response = self
            .client
            .post(&self.config.url)
            .header("api-token", &self.config.api_token)
            .json(message)
            .send()
            .map_err(|e| ApprovalError::Upstream {
                status: if e.is_timeout() { 408 } else { 502 },
                msg: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ApprovalError::Upstream {
                status: response.status().as_u16(),
                msg: format!("mail provider rejected '{}'", message.subject),
            });
        }
        Ok(())
    }
}

/// Keeps every message in memory instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &MailMessage) -> Result<(), ApprovalError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ApprovalError::Encoding("mail log poisoned".into()))?;
        sent.push(message.clone());
        Ok(())
    }
}

/// Roles told about a request entering `status`.
pub fn recipient_roles(status: Status, had_client_submission: bool) -> Vec<Role> {
    match status {
        Status::Pending if had_client_submission => vec![Role::Ae, Role::Client],
        Status::Pending => vec![Role::Ae],
        Status::Approved => vec![Role::Principal, Role::Bo],
        Status::Completed | Status::Rejected | Status::ActionRequired => {
            vec![Role::Principal, Role::Ae]
        }
        _ => vec![],
    }
}

fn subject_for(label: &str, status: Status) -> Option<String> {
    let subject = match status {
        Status::Pending => format!("{label} Request Submitted"),
        Status::Approved => format!("{label} Request Approved"),
        Status::Completed => format!("{label} Request Processed"),
        Status::Rejected => format!("{label} Request Rejected"),
        Status::ActionRequired => format!("{label} Action Required"),
        _ => return None,
    };
    Some(subject)
}

/// Everything the dispatcher needs to know about one transition.
pub struct TransitionNotice<'a> {
    pub request: &'a Request,
    pub status: Status,
    pub token: &'a str,
    pub actor: &'a UserContact,
    pub actor_role: Role,
    pub organization_access: &'a [String],
    /// Email of the client user that submitted the request, if any.
    pub client_submitter: Option<&'a str>,
}

pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    gateway: Arc<dyn PermissionsGateway>,
    config: MailConfig,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        gateway: Arc<dyn PermissionsGateway>,
        config: MailConfig,
    ) -> Self {
        Self {
            mailer,
            gateway,
            config,
            in_flight: Mutex::new(vec![]),
        }
    }

    /// Mails the roles interested in `notice.status`. Returns how many
    /// messages were queued.
    pub fn notify_transition(&self, notice: &TransitionNotice<'_>) -> usize {
        let Some(subject) = subject_for(notice.request.kind.label(), notice.status) else {
            return 0;
        };
        let roles = recipient_roles(notice.status, notice.client_submitter.is_some());

        let mut recipients = Vec::new();
        for role in roles {
            recipients.extend(self.recipients_for_role(notice, role));
        }

        let messages: Vec<MailMessage> = recipients
            .into_iter()
            .map(|recipient| {
                let message = format!(
                    "{} - {} was {} by {}: {}",
                    notice.request.kind.label(),
                    notice.request.id,
                    notice.status,
                    notice.actor_role,
                    notice.actor.name()
                );
                self.message(recipient, &subject, notice, message)
            })
            .collect();
        self.dispatch(messages)
    }

    /// Mails the reviewers picked by the escalation resolver.
    pub fn notify_review(
        &self,
        notices: &[ReviewNotice],
        request: &Request,
        token: &str,
        actor: &UserContact,
    ) -> usize {
        let label = request.kind.label();
        let subject = format!("Please review {label} - {}", request.id);
        let text = format!(
            "We're writing to inform you that {} has submitted {label} - {} for your review.",
            actor.name(),
            request.id
        );

        let mut messages = Vec::new();
        for notice in notices {
            let users = self.search(token, &notice.filter);
            debug!(tier = ?notice.tier, found = users.len(), "review recipients");
            for user in users {
                let transition = TransitionNotice {
                    request,
                    status: Status::Reviewed,
                    token,
                    actor,
                    actor_role: Role::Ae,
                    organization_access: &[],
                    client_submitter: None,
                };
                messages.push(self.message(
                    MailRecipient {
                        name: user.name(),
                        email: user.email,
                    },
                    &subject,
                    &transition,
                    text.clone(),
                ));
            }
        }
        self.dispatch(messages)
    }

    fn recipients_for_role(&self, notice: &TransitionNotice<'_>, role: Role) -> Vec<MailRecipient> {
        if role == Role::Client {
            return notice
                .client_submitter
                .map(|email| MailRecipient {
                    email: email.to_string(),
                    name: email.to_string(),
                })
                .into_iter()
                .collect();
        }

        let mut filter = PermissionFilter::require_any().include("app_flow", vec![role.as_str().into()]);
        if !notice.organization_access.is_empty() {
            filter = PermissionFilter::require_all()
                .include("app_flow", vec![role.as_str().into()])
                .include("organization_access", notice.organization_access.to_vec());
        }

        let mut users = self.search(notice.token, &filter);
        // principal mail only goes to whoever created the request
        if role == Role::Principal && !notice.request.created_by.is_empty() {
            users.retain(|user| user.email == notice.request.created_by);
        }
        users
            .into_iter()
            .map(|user| MailRecipient {
                name: user.name(),
                email: user.email,
            })
            .collect()
    }

    fn search(&self, token: &str, filter: &PermissionFilter) -> Vec<UserContact> {
        match self.gateway.search_users_by_permissions(token, filter) {
            Ok(users) => users,
            Err(err) => {
                warn!(%err, "recipient search failed");
                vec![]
            }
        }
    }

    fn message(
        &self,
        recipient: MailRecipient,
        subject: &str,
        notice: &TransitionNotice<'_>,
        notification_message: String,
    ) -> MailMessage {
        MailMessage {
            sender_email: self.config.sender_email.clone(),
            sender_name: self.config.sender_name.clone(),
            template_data: json!({
                "recipient_name": recipient.name,
                "sender_name": notice.actor.name(),
                "sender_role": notice.actor_role.as_str(),
                "notification_message": notification_message,
                "request_status": notice.status.as_str(),
                "request_type": notice.request.kind.label(),
                "request_id": notice.request.id,
            }),
            recipients: vec![recipient],
            bcc: self.config.bcc.clone(),
            subject: subject.to_string(),
            template_name: self.config.template_name.clone(),
        }
    }

    fn dispatch(&self, messages: Vec<MailMessage>) -> usize {
        let count = messages.len();
        if count == 0 {
            return 0;
        }
        let mailer = Arc::clone(&self.mailer);
        let handle = std::thread::spawn(move || {
            for message in &messages {
                if let Err(err) = mailer.send(message) {
                    warn!(%err, subject = %message.subject, "mail delivery failed");
                }
            }
        });
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.retain(|handle| !handle.is_finished());
            in_flight.push(handle);
        }
        info!(count, "notifications queued");
        count
    }

    /// Waits for every queued delivery to finish.
    pub fn flush(&self) {
        let handles = match self.in_flight.lock() {
            Ok(mut in_flight) => std::mem::take(&mut *in_flight),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("mail thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::StaticPermissionsGateway;
    use crate::role::RolePermissionBundle;
    use crate::status::RequestKind;

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send(&self, _: &MailMessage) -> Result<(), ApprovalError> {
            Err(ApprovalError::Upstream {
                status: 502,
                msg: "down".into(),
            })
        }
    }

    fn gateway() -> StaticPermissionsGateway {
        StaticPermissionsGateway::new()
            .with_user(
                "t-principal",
                UserContact::new("p@example.com", "Pat", "Doe"),
                RolePermissionBundle::new(Role::Principal).add_organization("org-1"),
            )
            .with_directory_user(
                UserContact::new("other-p@example.com", "Kim", "Roe"),
                RolePermissionBundle::new(Role::Principal).add_organization("org-1"),
            )
            .with_directory_user(
                UserContact::new("ae@example.com", "Avery", "Ng"),
                RolePermissionBundle::new(Role::Ae).add_organization("org-1"),
            )
            .with_directory_user(
                UserContact::new("bo@example.com", "Sam", "Lee"),
                RolePermissionBundle::new(Role::Bo).add_organization("org-1"),
            )
    }

    #[test]
    fn recipient_map() {
        assert_eq!(recipient_roles(Status::Pending, false), vec![Role::Ae]);
        assert_eq!(recipient_roles(Status::Pending, true), vec![Role::Ae, Role::Client]);
        assert_eq!(recipient_roles(Status::Approved, false), vec![Role::Principal, Role::Bo]);
        assert_eq!(recipient_roles(Status::Completed, false), vec![Role::Principal, Role::Ae]);
        assert!(recipient_roles(Status::Draft, false).is_empty());
    }

    #[test]
    fn approved_mail_reaches_creator_and_back_office() {
        let mailer = RecordingMailer::new();
        let dispatcher = NotificationDispatcher::new(
            Arc::new(mailer.clone()),
            Arc::new(gateway()),
            MailConfig::default(),
        );
        let request = Request::new(RequestKind::Soa, "client_1")
            .unwrap()
            .set_created_by("p@example.com");
        let actor = UserContact::new("ae@example.com", "Avery", "Ng");
        let orgs = vec!["org-1".to_string()];

        let queued = dispatcher.notify_transition(&TransitionNotice {
            request: &request,
            status: Status::Approved,
            token: "t-principal",
            actor: &actor,
            actor_role: Role::Ae,
            organization_access: &orgs,
            client_submitter: None,
        });
        dispatcher.flush();

        assert_eq!(queued, 2);
        let sent = mailer.sent();
        let emails: Vec<&str> = sent.iter().map(|m| m.recipients[0].email.as_str()).collect();
        assert_eq!(emails, vec!["p@example.com", "bo@example.com"]);
        assert_eq!(sent[0].subject, "SOA Request Approved");
    }

    #[test]
    fn delivery_failures_are_swallowed() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FailingMailer),
            Arc::new(gateway()),
            MailConfig::default(),
        );
        let request = Request::new(RequestKind::ReserveRelease, "client_1").unwrap();
        let actor = UserContact::new("p@example.com", "Pat", "Doe");

        let queued = dispatcher.notify_transition(&TransitionNotice {
            request: &request,
            status: Status::Pending,
            token: "t-principal",
            actor: &actor,
            actor_role: Role::Principal,
            organization_access: &[],
            client_submitter: Some("client@example.com"),
        });
        dispatcher.flush();
        assert_eq!(queued, 2);
    }

    #[test]
    fn unconfigured_http_mailer_sends_nothing() {
        let mailer = HttpMailer::new(MailConfig::default()).unwrap();
        let message = MailMessage {
            sender_email: String::new(),
            sender_name: String::new(),
            recipients: vec![MailRecipient {
                email: "p@example.com".into(),
                name: "Pat Doe".into(),
            }],
            bcc: vec![],
            subject: "SOA Request Approved".into(),
            template_name: String::new(),
            template_data: json!({}),
        };
        assert!(mailer.send(&message).is_ok());
    }
}
