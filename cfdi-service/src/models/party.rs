//! Issuer, receiver and actor value objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use super::fiscal::{PaymentForm, PaymentMethod};

/// The user (or service account) on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Actor {
    pub actor_id: Uuid,
    pub external_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
}

/// How the caller identifies the actor; resolved once before orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorRef {
    ByExternalId(String),
    Explicit(Actor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SupplierBusiness {
    pub supplier_business_id: Uuid,
    pub name: String,
    pub notification_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SupplierUnit {
    pub supplier_unit_id: Uuid,
    pub supplier_business_id: Uuid,
    pub unit_name: String,
    pub zip_code: String,
    /// Invoice series printed before the folio, if the unit uses one.
    pub invoice_series: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RestaurantBranch {
    pub restaurant_branch_id: Uuid,
    pub restaurant_business_id: Uuid,
    pub branch_name: String,
}

/// The branch's receiver identity for fiscal documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BranchFiscal {
    pub restaurant_branch_id: Uuid,
    pub rfc: String,
    pub legal_name: String,
    pub tax_regime: String,
    pub zip_code: String,
    pub cfdi_use: String,
    pub email: Option<String>,
    /// Customer id registered at the stamping provider; set once, never re-registered.
    pub provider_customer_id: Option<String>,
}

/// Issuer-side defaults for how invoices are paid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoicingOptions {
    pub default_payment_method: Option<PaymentMethod>,
    pub default_payment_form: Option<PaymentForm>,
    /// Per restaurant-branch payment method overrides.
    #[serde(default)]
    pub branch_overrides: HashMap<Uuid, PaymentMethod>,
}

/// Issuer legal/tax identity, owned by credential management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalCertificate {
    pub supplier_business_id: Uuid,
    pub rfc: String,
    pub legal_name: String,
    pub tax_regime: String,
    pub zip_code: String,
    pub invoicing_options: InvoicingOptions,
}

/// Issuer/receiver summary returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartySummary {
    pub rfc: String,
    pub legal_name: String,
    pub tax_regime: String,
    pub zip_code: String,
}

impl From<&FiscalCertificate> for PartySummary {
    fn from(cert: &FiscalCertificate) -> Self {
        Self {
            rfc: cert.rfc.clone(),
            legal_name: cert.legal_name.clone(),
            tax_regime: cert.tax_regime.clone(),
            zip_code: cert.zip_code.clone(),
        }
    }
}

impl From<&BranchFiscal> for PartySummary {
    fn from(fiscal: &BranchFiscal) -> Self {
        Self {
            rfc: fiscal.rfc.clone(),
            legal_name: fiscal.legal_name.clone(),
            tax_regime: fiscal.tax_regime.clone(),
            zip_code: fiscal.zip_code.clone(),
        }
    }
}
