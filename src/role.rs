//! Caller roles and the permission bundle resolved for each call
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApprovalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Principal,
    Ae,
    Bo,
    Client,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Principal, Role::Ae, Role::Bo, Role::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Principal => "principal",
            Role::Ae => "ae",
            Role::Bo => "bo",
            Role::Client => "client",
        }
    }
}

impl FromStr for Role {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "principal" => Ok(Role::Principal),
            "ae" => Ok(Role::Ae),
            "bo" => Ok(Role::Bo),
            "client" => Ok(Role::Client),
            _ => Err(ApprovalError::RoleNotSelected),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscPermissions {
    #[serde(default)]
    pub can_modify: bool,
    #[serde(default)]
    pub override_action_required: bool,
    #[serde(default)]
    pub can_delete_debtors: bool,
    #[serde(default)]
    pub can_merge_debtors: bool,
}

impl MiscPermissions {
    /// Whether the named flag is set. Unknown names are never set.
    pub fn has(&self, name: &str) -> bool {
        match name {
            "can_modify" => self.can_modify,
            "override_action_required" => self.override_action_required,
            "can_delete_debtors" => self.can_delete_debtors,
            "can_merge_debtors" => self.can_merge_debtors,
            _ => false,
        }
    }
}

/// Everything the auth service knows about the caller, resolved once per
/// call and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePermissionBundle {
    pub user_role: Option<Role>,
    pub approval_limit: Option<Decimal>,
    pub misc_permissions: MiscPermissions,
    pub organization_access: Vec<String>,
    pub show_requests: BTreeMap<String, Value>,
    pub show_info: BTreeMap<String, Value>,
    pub create_edit_permission: BTreeMap<String, Value>,
}

impl RolePermissionBundle {
    pub fn new(role: Role) -> Self {
        Self {
            user_role: Some(role),
            ..Self::default()
        }
    }
    pub fn set_approval_limit(mut self, limit: Decimal) -> Self {
        self.approval_limit = Some(limit);
        self
    }
    pub fn set_can_modify(mut self, flag: bool) -> Self {
        self.misc_permissions.can_modify = flag;
        self
    }
    pub fn set_override_action_required(mut self, flag: bool) -> Self {
        self.misc_permissions.override_action_required = flag;
        self
    }
    pub fn add_organization(mut self, organization_id: &str) -> Self {
        self.organization_access.push(organization_id.to_string());
        self
    }

    pub fn role(&self) -> Result<Role, ApprovalError> {
        self.user_role.ok_or(ApprovalError::RoleNotSelected)
    }

    /// Limit used by the escalation resolver. Only AE callers carry one.
    pub fn ae_approval_limit(&self) -> Decimal {
        match self.user_role {
            Some(Role::Ae) => self.approval_limit.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }

    /// Builds a bundle from the `payload` object of `GET /v2/permissions`.
    ///
    /// `app_flow`, `organization_access`, `approval_limit` and
    /// `misc_permissions` arrive as `{name: bool}` maps; the role is the
    /// first `app_flow` key and the limit is the first `approval_limit` key.
    pub fn from_payload(payload: &Value) -> Result<Self, ApprovalError> {
        let user_role = match payload.get("app_flow").and_then(Value::as_object) {
            Some(flow) => match flow.keys().next() {
                Some(name) => Some(name.parse::<Role>()?),
                None => None,
            },
            None => None,
        };

        let organization_access = payload
            .get("organization_access")
            .and_then(Value::as_object)
            .map(|orgs| {
                orgs.iter()
                    .filter(|(_, enabled)| enabled.as_bool() == Some(true))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();

        let approval_limit = match payload.get("approval_limit").and_then(Value::as_object) {
            Some(limits) => match limits.keys().next() {
                Some(raw) => Some(Decimal::from_str(raw).map_err(|_| {
                    ApprovalError::Validation(format!("approval_limit '{raw}' is not a number"))
                })?),
                None => None,
            },
            None => None,
        };

        let misc_permissions = match payload.get("misc_permissions") {
            Some(value) if value.is_object() => serde_json::from_value(value.clone())?,
            _ => MiscPermissions::default(),
        };

        Ok(Self {
            user_role,
            approval_limit,
            misc_permissions,
            organization_access,
            show_requests: object_map(payload, "show_requests"),
            show_info: object_map(payload, "show_info"),
            create_edit_permission: object_map(payload, "create_edit_permission"),
        })
    }
}

fn object_map(payload: &Value, name: &str) -> BTreeMap<String, Value> {
    payload
        .get(name)
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Approval limit tiers, in the currency of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalTiers {
    pub jam: Decimal,
    pub rm: Decimal,
    pub fom: Decimal,
    pub coo: Decimal,
    pub cro: Decimal,
}

impl Default for ApprovalTiers {
    fn default() -> Self {
        Self {
            jam: Decimal::from(50_000),
            rm: Decimal::from(500_000),
            fom: Decimal::from(1_000_000),
            coo: Decimal::from(1_000_000),
            cro: Decimal::from(999_999_999),
        }
    }
}
