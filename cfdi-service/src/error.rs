//! Domain error taxonomy for the invoice lifecycle engine.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;

pub type CfdiResult<T> = Result<T, CfdiError>;

/// Every failure an orchestration can end with. Each one aborts the operation
/// with nothing persisted, except where the orchestrator documents otherwise.
#[derive(Debug, Error)]
pub enum CfdiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("actor '{0}' could not be resolved")]
    ActorNotFound(String),

    #[error("order details {order_details_id} already has an invoice")]
    DuplicateInvoice { order_details_id: Uuid },

    #[error("line item taxes ({computed}) do not match the order's recorded tax ({recorded})")]
    TaxMismatch { computed: Decimal, recorded: Decimal },

    #[error("issuer {rfc} has no fiscal credentials at the provider")]
    CredentialMissing { rfc: String },

    #[error("fiscal provider error: {message}")]
    Provider {
        message: String,
        code: Option<String>,
    },

    #[error("invoice {invoice_id} already has payment complements")]
    ExistingComplement { invoice_id: Uuid },

    #[error("orders must share exactly one {scope}, found {found}")]
    UniqueScopeViolation { scope: &'static str, found: usize },

    #[error("no payment method configured for supplier business {supplier_business_id}")]
    MissingInvoicingConfig { supplier_business_id: Uuid },

    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl CfdiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Short label used for the error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CfdiError::Validation(_) => "validation",
            CfdiError::NotFound(_) => "not_found",
            CfdiError::ActorNotFound(_) => "actor_not_found",
            CfdiError::DuplicateInvoice { .. } => "duplicate_invoice",
            CfdiError::TaxMismatch { .. } => "tax_mismatch",
            CfdiError::CredentialMissing { .. } => "credential_missing",
            CfdiError::Provider { .. } => "provider",
            CfdiError::ExistingComplement { .. } => "existing_complement",
            CfdiError::UniqueScopeViolation { .. } => "unique_scope_violation",
            CfdiError::MissingInvoicingConfig { .. } => "missing_invoicing_config",
            CfdiError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<GatewayError> for CfdiError {
    fn from(err: GatewayError) -> Self {
        CfdiError::Provider {
            message: err.message,
            code: err.code,
        }
    }
}

impl From<CfdiError> for AppError {
    fn from(err: CfdiError) -> Self {
        match err {
            CfdiError::Validation(_)
            | CfdiError::TaxMismatch { .. }
            | CfdiError::UniqueScopeViolation { .. }
            | CfdiError::MissingInvoicingConfig { .. } => {
                AppError::Unprocessable(anyhow::anyhow!(err.to_string()))
            }
            CfdiError::NotFound(_) | CfdiError::ActorNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            CfdiError::DuplicateInvoice { .. } | CfdiError::ExistingComplement { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            CfdiError::CredentialMissing { .. } => {
                AppError::PreconditionFailed(anyhow::anyhow!(err.to_string()))
            }
            CfdiError::Provider { message, .. } => AppError::BadGateway(message),
            CfdiError::Unexpected(inner) => AppError::InternalError(inner),
        }
    }
}
