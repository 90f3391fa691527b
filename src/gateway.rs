//! The external auth service: who the caller is and who else holds a
//! given set of permissions.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::ApprovalError;
use crate::role::RolePermissionBundle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCriterion {
    pub app_resource_name: String,
    pub permissions: Vec<String>,
}

/// A permission search. With `require_all` every include criterion must
/// match, otherwise any one is enough; a user matching any exclude
/// criterion is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFilter {
    pub permissions_include: Vec<PermissionCriterion>,
    pub permissions_exclude: Vec<PermissionCriterion>,
    pub require_all: bool,
}

impl PermissionFilter {
    pub fn require_all() -> Self {
        Self {
            require_all: true,
            ..Self::default()
        }
    }
    pub fn require_any() -> Self {
        Self::default()
    }
    pub fn include(mut self, resource: &str, permissions: Vec<String>) -> Self {
        self.permissions_include.push(PermissionCriterion {
            app_resource_name: resource.to_string(),
            permissions,
        });
        self
    }
    pub fn exclude(mut self, resource: &str, permissions: Vec<String>) -> Self {
        self.permissions_exclude.push(PermissionCriterion {
            app_resource_name: resource.to_string(),
            permissions,
        });
        self
    }

    /// Evaluates the filter against a bundle the way the auth service does.
    pub fn matches(&self, bundle: &RolePermissionBundle) -> bool {
        if self.permissions_include.is_empty() {
            return false;
        }
        let included = if self.require_all {
            self.permissions_include.iter().all(|c| criterion_matches(c, bundle))
        } else {
            self.permissions_include.iter().any(|c| criterion_matches(c, bundle))
        };
        included && !self.permissions_exclude.iter().any(|c| criterion_matches(c, bundle))
    }
}

fn criterion_matches(criterion: &PermissionCriterion, bundle: &RolePermissionBundle) -> bool {
    let flag = |map: &BTreeMap<String, Value>, name: &str| map.get(name) == Some(&Value::Bool(true));

    criterion.permissions.iter().any(|permission| {
        match criterion.app_resource_name.as_str() {
            "app_flow" => bundle.user_role.is_some_and(|role| role.as_str() == permission.as_str()),
            "approval_limit" => match (bundle.approval_limit, Decimal::from_str(permission)) {
                (Some(limit), Ok(wanted)) => limit == wanted,
                _ => false,
            },
            "organization_access" => bundle.organization_access.contains(permission),
            "misc_permissions" => bundle.misc_permissions.has(permission),
            "show_requests" => flag(&bundle.show_requests, permission),
            "show_info" => flag(&bundle.show_info, permission),
            "create_edit_permission" => flag(&bundle.create_edit_permission, permission),
            _ => false,
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContact {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserContact {
    pub fn new(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: String::new(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

pub trait PermissionsGateway: Send + Sync {
    /// Role and permissions of the caller behind `token`.
    fn resolve(&self, token: &str) -> Result<RolePermissionBundle, ApprovalError>;

    /// Users holding the permissions described by `filter`.
    fn search_users_by_permissions(
        &self,
        token: &str,
        filter: &PermissionFilter,
    ) -> Result<Vec<UserContact>, ApprovalError>;

    fn user_profile(&self, token: &str) -> Result<UserContact, ApprovalError>;
}

/// Talks to the auth service over HTTP.
pub struct HttpPermissionsGateway {
    client: Client,
    config: AuthConfig,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    msg: Option<String>,
    payload: Option<T>,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    app_identifier: &'a str,
    permissions: &'a [PermissionCriterion],
    #[serde(skip_serializing_if = "no_criteria")]
    excludes: &'a [PermissionCriterion],
    require_all: bool,
}

fn no_criteria(criteria: &&[PermissionCriterion]) -> bool {
    criteria.is_empty()
}

impl HttpPermissionsGateway {
    pub fn new(config: AuthConfig) -> Result<Self, ApprovalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(transport_error)?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn payload<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApprovalError> {
        let status = response.status();
        let envelope = response.json::<Envelope<T>>();
        if !status.is_success() {
            return Err(ApprovalError::Upstream {
                status: status.as_u16(),
                msg: envelope
                    .ok()
                    .and_then(|body| body.msg)
                    .unwrap_or_else(|| "Something went wrong, please login again".into()),
            });
        }
        let envelope = envelope.map_err(transport_error)?;
        envelope.payload.ok_or_else(|| ApprovalError::Upstream {
            status: 500,
            msg: envelope.msg.unwrap_or_else(|| "empty payload".into()),
        })
    }
}

impl PermissionsGateway for HttpPermissionsGateway {
    fn resolve(&self, token: &str) -> Result<RolePermissionBundle, ApprovalError> {
        if token.is_empty() {
            return Err(ApprovalError::Upstream {
                status: 401,
                msg: "Auth token is invalid, please login again".into(),
            });
        }
        let response = self
            .client
            .get(self.url("v2/permissions"))
            .query(&[("app_identifier", self.config.app_identifier.as_str()), ("active", "true")])
            .header("auth-token", token)
            .header("api-token", &self.config.api_token)
            .send()
            .map_err(transport_error)?;

        let payload: Value = Self::payload(response)?;
        let bundle = RolePermissionBundle::from_payload(&payload)?;
        debug!(role = ?bundle.user_role, orgs = bundle.organization_access.len(), "permissions resolved");
        Ok(bundle)
    }

    fn search_users_by_permissions(
        &self,
        token: &str,
        filter: &PermissionFilter,
    ) -> Result<Vec<UserContact>, ApprovalError> {
        let body = SearchBody {
            app_identifier: &self.config.app_identifier,
            permissions: &filter.permissions_include,
            excludes: &filter.permissions_exclude,
            require_all: filter.require_all,
        };
        let response = self
            .client
            .post(self.url("v2/users/search/permissions"))
            .query(&[("active", "true")])
            .header("auth-token", token)
            .header("api-token", &self.config.api_token)
            .json(&body)
            .send()
            .map_err(transport_error)?;

        let users: Vec<UserContact> = Self::payload(response)?;
        Ok(users.into_iter().filter(|user| !user.email.is_empty()).collect())
    }

    fn user_profile(&self, token: &str) -> Result<UserContact, ApprovalError> {
        let response = self
            .client
            .get(self.url("v2/users/profile"))
            .header("auth-token", token)
            .header("api-token", &self.config.api_token)
            .send()
            .map_err(transport_error)?;

        Self::payload(response)
    }
}

fn transport_error(error: reqwest::Error) -> ApprovalError {
    let (status, msg) = if error.is_connect() {
        (502, format!("Connection Error: {error}"))
    } else if error.is_timeout() {
        (408, format!("Timeout Error: {error}"))
    } else if let Some(status) = error.status() {
        (status.as_u16(), format!("HTTP Error: {error}"))
    } else {
        (500, format!("RequestException Error: {error}"))
    };
    warn!(status, %msg, "auth service call failed");
    ApprovalError::Upstream { status, msg }
}

/// In-memory auth service for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionsGateway {
    sessions: BTreeMap<String, (UserContact, RolePermissionBundle)>,
    directory: Vec<(UserContact, RolePermissionBundle)>,
}

impl StaticPermissionsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user and a token that resolves to them.
    pub fn with_user(mut self, token: &str, user: UserContact, bundle: RolePermissionBundle) -> Self {
        self.sessions.insert(token.to_string(), (user.clone(), bundle.clone()));
        self.directory.push((user, bundle));
        self
    }

    /// Registers a user that can be found by search but never logs in.
    pub fn with_directory_user(mut self, user: UserContact, bundle: RolePermissionBundle) -> Self {
        self.directory.push((user, bundle));
        self
    }

    fn session(&self, token: &str) -> Result<&(UserContact, RolePermissionBundle), ApprovalError> {
        self.sessions.get(token).ok_or_else(|| ApprovalError::Upstream {
            status: 401,
            msg: "Auth token is invalid, please login again".into(),
        })
    }
}

impl PermissionsGateway for StaticPermissionsGateway {
    fn resolve(&self, token: &str) -> Result<RolePermissionBundle, ApprovalError> {
        Ok(self.session(token)?.1.clone())
    }

    fn search_users_by_permissions(
        &self,
        token: &str,
        filter: &PermissionFilter,
    ) -> Result<Vec<UserContact>, ApprovalError> {
        self.session(token)?;
        Ok(self
            .directory
            .iter()
            .filter(|(_, bundle)| filter.matches(bundle))
            .map(|(user, _)| user.clone())
            .collect())
    }

    fn user_profile(&self, token: &str) -> Result<UserContact, ApprovalError> {
        Ok(self.session(token)?.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    fn fom() -> RolePermissionBundle {
        RolePermissionBundle::new(Role::Ae)
            .set_approval_limit(Decimal::from(1_000_000))
            .add_organization("org-1")
    }

    #[test]
    fn filter_requires_every_criterion() {
        let filter = PermissionFilter::require_all()
            .include("approval_limit", vec!["1000000".into()])
            .include("app_flow", vec!["ae".into()])
            .include("organization_access", vec!["org-1".into()]);

        assert!(filter.matches(&fom()));
        assert!(!filter.matches(&fom().set_approval_limit(Decimal::from(500_000))));
        assert!(!filter.matches(&RolePermissionBundle::new(Role::Bo).add_organization("org-1")));
    }

    #[test]
    fn excludes_drop_matching_users() {
        let filter = PermissionFilter::require_all()
            .include("app_flow", vec!["ae".into()])
            .exclude("misc_permissions", vec!["override_action_required".into()]);

        assert!(filter.matches(&fom()));
        assert!(!filter.matches(&fom().set_override_action_required(true)));
    }

    #[test]
    fn any_mode_needs_one_criterion() {
        let filter = PermissionFilter::require_any()
            .include("app_flow", vec!["bo".into()])
            .include("organization_access", vec!["org-1".into()]);
        assert!(filter.matches(&fom()));
        assert!(!PermissionFilter::require_any().matches(&fom()));
    }

    #[test]
    fn static_gateway_resolves_and_searches() {
        let gateway = StaticPermissionsGateway::new()
            .with_user("t-ae", UserContact::new("ae@example.com", "Avery", "Ng"), fom())
            .with_directory_user(
                UserContact::new("bo@example.com", "Sam", "Lee"),
                RolePermissionBundle::new(Role::Bo).add_organization("org-1"),
            );

        assert_eq!(gateway.resolve("t-ae").unwrap().user_role, Some(Role::Ae));
        assert_eq!(gateway.user_profile("t-ae").unwrap().name(), "Avery Ng");

        let filter = PermissionFilter::require_all().include("app_flow", vec!["bo".into()]);
        let found = gateway.search_users_by_permissions("t-ae", &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "bo@example.com");

        let err = gateway.resolve("nope").unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
