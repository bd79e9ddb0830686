//! In-process stamping provider for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    CancellationReceipt, CancellationStatus, FiscalProvider, GatewayError, GatewayResult,
    InvoiceDocument, IssuerCredentials, PaymentComplementDocument, ProviderCustomer,
    StampedDocument,
};
use crate::line_items;
use crate::models::CancellationMotive;

/// A call received by [`MockFiscalProvider`], in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    GetIssuerCredentials { rfc: String },
    CreateClient { tax_id: String },
    IssueInvoice(Box<InvoiceDocument>),
    IssuePaymentComplement(Box<PaymentComplementDocument>),
    FetchPdf { provider_id: String },
    FetchXml { provider_id: String },
    Cancel {
        provider_id: String,
        motive: CancellationMotive,
        replacement_uuid: Option<String>,
    },
}

impl ProviderCall {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderCall::GetIssuerCredentials { .. } => "get_issuer_credentials",
            ProviderCall::CreateClient { .. } => "create_client",
            ProviderCall::IssueInvoice(_) => "issue_invoice",
            ProviderCall::IssuePaymentComplement(_) => "issue_payment_complement",
            ProviderCall::FetchPdf { .. } => "fetch_pdf",
            ProviderCall::FetchXml { .. } => "fetch_xml",
            ProviderCall::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Default)]
struct MockState {
    issuers: HashMap<String, IssuerCredentials>,
    failures: HashMap<&'static str, GatewayError>,
    cancellation_status: Option<CancellationStatus>,
    calls: Vec<ProviderCall>,
}

/// Scriptable provider: register issuers, inject failures per call name and
/// choose how cancellations resolve. Every call is recorded.
#[derive(Default)]
pub struct MockFiscalProvider {
    state: Mutex<MockState>,
    sequence: AtomicU64,
}

impl MockFiscalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an issuer with a valid certificate.
    pub fn with_issuer(self, rfc: &str, legal_name: &str) -> Self {
        self.state().issuers.insert(
            rfc.to_string(),
            IssuerCredentials {
                rfc: rfc.to_string(),
                legal_name: legal_name.to_string(),
                has_certificate: true,
                certificate_expires_utc: None,
            },
        );
        self
    }

    pub fn set_issuer(&self, credentials: IssuerCredentials) {
        self.state()
            .issuers
            .insert(credentials.rfc.clone(), credentials);
    }

    /// Make every subsequent call named `call` fail with `error`.
    pub fn fail_on(&self, call: &'static str, error: GatewayError) {
        self.state().failures.insert(call, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Leave cancellations pending receiver acceptance instead of accepting them.
    pub fn set_cancellation_status(&self, status: CancellationStatus) {
        self.state().cancellation_status = Some(status);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.name() == call)
            .count()
    }

    pub fn issued_invoices(&self) -> Vec<InvoiceDocument> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::IssueInvoice(doc) => Some((**doc).clone()),
                _ => None,
            })
            .collect()
    }

    pub fn issued_complements(&self) -> Vec<PaymentComplementDocument> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::IssuePaymentComplement(doc) => Some((**doc).clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProviderCall) -> GatewayResult<()> {
        let mut state = self.state();
        let name = call.name();
        state.calls.push(call);
        match state.failures.get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn stamp(&self, total: Decimal) -> StampedDocument {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        StampedDocument {
            provider_id: format!("mock-cfdi-{}", n),
            fiscal_uuid: format!("00000000-0000-4000-8000-{:012}", n),
            total,
            stamped_utc: Utc::now(),
        }
    }
}

#[async_trait]
impl FiscalProvider for MockFiscalProvider {
    async fn get_issuer_credentials(&self, rfc: &str) -> GatewayResult<Option<IssuerCredentials>> {
        self.record(ProviderCall::GetIssuerCredentials {
            rfc: rfc.to_string(),
        })?;
        Ok(self.state().issuers.get(rfc).cloned())
    }

    async fn create_client(&self, customer: &ProviderCustomer) -> GatewayResult<String> {
        self.record(ProviderCall::CreateClient {
            tax_id: customer.tax_id.clone(),
        })?;
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-customer-{}", n))
    }

    async fn issue_invoice(&self, document: &InvoiceDocument) -> GatewayResult<StampedDocument> {
        self.record(ProviderCall::IssueInvoice(Box::new(document.clone())))?;
        tracing::info!(folio = document.folio, "[MOCK] Invoice would be stamped");
        Ok(self.stamp(line_items::round2(line_items::total(&document.items))))
    }

    async fn issue_payment_complement(
        &self,
        document: &PaymentComplementDocument,
    ) -> GatewayResult<StampedDocument> {
        self.record(ProviderCall::IssuePaymentComplement(Box::new(
            document.clone(),
        )))?;
        let paid = document.related_documents.iter().map(|r| r.amount_paid).sum();
        Ok(self.stamp(paid))
    }

    async fn fetch_pdf(&self, provider_id: &str) -> GatewayResult<Vec<u8>> {
        self.record(ProviderCall::FetchPdf {
            provider_id: provider_id.to_string(),
        })?;
        Ok(format!("%PDF-mock {}", provider_id).into_bytes())
    }

    async fn fetch_xml(&self, provider_id: &str) -> GatewayResult<Vec<u8>> {
        self.record(ProviderCall::FetchXml {
            provider_id: provider_id.to_string(),
        })?;
        Ok(format!("<cfdi:Comprobante Id=\"{}\"/>", provider_id).into_bytes())
    }

    async fn cancel(
        &self,
        provider_id: &str,
        motive: CancellationMotive,
        replacement_uuid: Option<&str>,
    ) -> GatewayResult<CancellationReceipt> {
        self.record(ProviderCall::Cancel {
            provider_id: provider_id.to_string(),
            motive,
            replacement_uuid: replacement_uuid.map(str::to_string),
        })?;
        let status = self
            .state()
            .cancellation_status
            .unwrap_or(CancellationStatus::Canceled);
        Ok(CancellationReceipt {
            status,
            payload: serde_json::json!({
                "id": provider_id,
                "status": status,
                "motive": motive.code(),
                "substitution": replacement_uuid,
            }),
        })
    }
}
