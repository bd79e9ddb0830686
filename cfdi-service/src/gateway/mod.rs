//! Fiscal document provider gateway.
//!
//! The stamping provider validates, stamps and cancels documents with the tax
//! authority. Every call either succeeds or fails terminally: nothing here
//! retries, and the provider's message is preserved for the caller.

mod http;
mod mock;

pub use http::HttpFiscalProvider;
pub use mock::{MockFiscalProvider, ProviderCall};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CancellationMotive, CfdiType, LineItem, PaymentForm, PaymentMethod};

/// A failed provider call. Terminal for the current operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GatewayError {
    pub message: String,
    pub code: Option<String>,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Issuer credential status as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerCredentials {
    pub rfc: String,
    pub legal_name: String,
    pub has_certificate: bool,
    pub certificate_expires_utc: Option<DateTime<Utc>>,
}

impl IssuerCredentials {
    /// Whether the issuer can stamp right now.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.has_certificate && self.certificate_expires_utc.map_or(true, |expires| expires > now)
    }
}

/// Receiver profile registered at (or sent inline to) the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCustomer {
    pub legal_name: String,
    pub tax_id: String,
    pub tax_system: String,
    pub zip: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentReceiver {
    /// A customer previously registered through `create_client`.
    Registered { customer_id: String, cfdi_use: String },
    /// Generic profile sent inline (general public).
    Inline { customer: ProviderCustomer, cfdi_use: String },
}

/// Month/year aggregation block required for general-public invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalInformation {
    pub periodicity: String,
    pub months: String,
    pub year: i32,
}

/// An invoice ready for stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub issuer_rfc: String,
    pub receiver: DocumentReceiver,
    pub cfdi_type: CfdiType,
    pub payment_form: PaymentForm,
    pub payment_method: PaymentMethod,
    pub expedition_place: String,
    pub folio: i64,
    pub series: Option<String>,
    pub issued_utc: DateTime<Utc>,
    pub currency: String,
    pub items: Vec<LineItem>,
    pub observations: String,
    pub global: Option<GlobalInformation>,
}

/// One prior invoice a payment is applied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedDocument {
    pub fiscal_uuid: String,
    pub folio: i64,
    pub series: Option<String>,
    pub installment: u32,
    pub previous_balance: Decimal,
    pub amount_paid: Decimal,
}

/// A payment complement ready for stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentComplementDocument {
    pub issuer_rfc: String,
    pub receiver: DocumentReceiver,
    pub expedition_place: String,
    pub folio: i64,
    pub series: Option<String>,
    pub payment_form: PaymentForm,
    pub paid_utc: DateTime<Utc>,
    pub currency: String,
    pub related_documents: Vec<RelatedDocument>,
}

/// What the provider returns for an accepted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedDocument {
    pub provider_id: String,
    pub fiscal_uuid: String,
    pub total: Decimal,
    pub stamped_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Canceled,
    /// The receiver has to accept the cancellation first.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub status: CancellationStatus,
    /// Raw provider response, stored on the invoice.
    pub payload: serde_json::Value,
}

/// Client for the external stamping/cancellation service.
#[async_trait]
pub trait FiscalProvider: Send + Sync {
    /// `Ok(None)` when the provider has no credentials for the RFC.
    async fn get_issuer_credentials(&self, rfc: &str) -> GatewayResult<Option<IssuerCredentials>>;

    /// Register a receiver; returns the provider's customer id.
    async fn create_client(&self, customer: &ProviderCustomer) -> GatewayResult<String>;

    async fn issue_invoice(&self, document: &InvoiceDocument) -> GatewayResult<StampedDocument>;

    async fn issue_payment_complement(
        &self,
        document: &PaymentComplementDocument,
    ) -> GatewayResult<StampedDocument>;

    async fn fetch_pdf(&self, provider_id: &str) -> GatewayResult<Vec<u8>>;

    async fn fetch_xml(&self, provider_id: &str) -> GatewayResult<Vec<u8>>;

    async fn cancel(
        &self,
        provider_id: &str,
        motive: CancellationMotive,
        replacement_uuid: Option<&str>,
    ) -> GatewayResult<CancellationReceipt>;
}
