#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{msg}")]
    Upstream { status: u16, msg: String },
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("app_flow: user role not selected, must be principal/ae/bo")]
    RoleNotSelected,
    #[error("Request has already been reviewed and sent to the desired reviewer")]
    AlreadyReviewed,
    #[error(
        "Not enough outstanding amount to proceed. Modify the payee disbursements to accommodate the ASAP fee"
    )]
    InsufficientOutstanding,
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl ApprovalError {
    /// HTTP status a controller answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApprovalError::PermissionDenied(_) => 403,
            ApprovalError::NotFound(_) => 404,
            ApprovalError::Upstream { status, .. } => *status,
            ApprovalError::Validation(_) => 400,
            // unhandled lookups and role misses surface as 404 upstream
            ApprovalError::RoleNotSelected => 404,
            ApprovalError::AlreadyReviewed => 404,
            ApprovalError::InsufficientOutstanding => 400,
            ApprovalError::Storage(_) => 500,
            ApprovalError::Encoding(_) => 500,
        }
    }
}

impl From<minicbor::decode::Error> for ApprovalError {
    fn from(value: minicbor::decode::Error) -> Self {
        ApprovalError::Encoding(value.to_string())
    }
}

impl From<serde_json::Error> for ApprovalError {
    fn from(value: serde_json::Error) -> Self {
        ApprovalError::Encoding(value.to_string())
    }
}
