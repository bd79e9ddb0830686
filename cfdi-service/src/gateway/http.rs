//! REST client for the stamping provider.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::instrument;

use super::{
    CancellationReceipt, CancellationStatus, FiscalProvider, GatewayError, GatewayResult,
    InvoiceDocument, IssuerCredentials, PaymentComplementDocument, ProviderCustomer,
    StampedDocument,
};
use crate::config::ProviderConfig;
use crate::models::CancellationMotive;
use crate::services::metrics::{PROVIDER_CALLS_TOTAL, PROVIDER_CALL_DURATION};

/// Provider error body: `{"message": "...", "code": "..."}`.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CancellationBody {
    status: CancellationStatus,
}

/// JSON-over-HTTP gateway authenticated with a bearer api key.
#[derive(Clone)]
pub struct HttpFiscalProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpFiscalProvider {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.config.api_key.expose_secret())
    }

    /// Send once and return status plus raw body. Transport failures become gateway errors.
    async fn send(
        &self,
        call: &'static str,
        request: RequestBuilder,
    ) -> GatewayResult<(StatusCode, Vec<u8>)> {
        let started = Instant::now();
        let result = self.authorized(request).send().await;
        let outcome = match result {
            Ok(response) => {
                let status = response.status();
                response
                    .bytes()
                    .await
                    .map(|body| (status, body.to_vec()))
                    .map_err(|e| transport_error(call, &e))
            }
            Err(e) => Err(transport_error(call, &e)),
        };

        PROVIDER_CALL_DURATION
            .with_label_values(&[call])
            .observe(started.elapsed().as_secs_f64());
        let label = match &outcome {
            Ok((status, _)) if status.is_success() => "ok",
            Ok((status, _)) if *status == StatusCode::NOT_FOUND => "not_found",
            _ => "error",
        };
        PROVIDER_CALLS_TOTAL.with_label_values(&[call, label]).inc();

        outcome
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        call: &'static str,
        request: RequestBuilder,
    ) -> GatewayResult<T> {
        let body = self.send_ok(call, request).await?;
        serde_json::from_slice(&body).map_err(|e| unreadable_response(call, &e))
    }

    async fn send_ok(&self, call: &'static str, request: RequestBuilder) -> GatewayResult<Vec<u8>> {
        let (status, body) = self.send(call, request).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(decode_error(status, &body))
        }
    }
}

/// Transport details name the provider host, so they stay in the logs.
fn transport_error(call: &'static str, err: &dyn std::fmt::Display) -> GatewayError {
    tracing::warn!(call, error = %err, "Fiscal provider request failed");
    GatewayError::with_code("fiscal provider unavailable", "transport")
}

fn unreadable_response(call: &'static str, err: &dyn std::fmt::Display) -> GatewayError {
    tracing::warn!(call, error = %err, "Fiscal provider response could not be decoded");
    GatewayError::with_code("fiscal provider returned an unreadable response", "decode")
}

fn decode_error(status: StatusCode, body: &[u8]) -> GatewayError {
    match serde_json::from_slice::<ProviderErrorBody>(body) {
        Ok(err) => GatewayError {
            message: err.message,
            code: err.code,
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            tracing::debug!(status = %status, body = %text, "Undecodable provider error body");
            GatewayError::with_code(
                format!("provider responded with status {}", status.as_u16()),
                status.as_u16().to_string(),
            )
        }
    }
}

#[async_trait]
impl FiscalProvider for HttpFiscalProvider {
    #[instrument(skip(self))]
    async fn get_issuer_credentials(&self, rfc: &str) -> GatewayResult<Option<IssuerCredentials>> {
        let request = self.client.get(self.url(&format!("issuers/{}", rfc)));
        let (status, body) = self.send("get_issuer_credentials", request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(decode_error(status, &body));
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| unreadable_response("get_issuer_credentials", &e))
    }

    #[instrument(skip(self, customer), fields(tax_id = %customer.tax_id))]
    async fn create_client(&self, customer: &ProviderCustomer) -> GatewayResult<String> {
        let request = self.client.post(self.url("customers")).json(customer);
        let created: CreatedCustomer = self.send_json("create_client", request).await?;
        tracing::info!(customer_id = %created.id, "Provider customer registered");
        Ok(created.id)
    }

    #[instrument(skip(self, document), fields(folio = document.folio, issuer = %document.issuer_rfc))]
    async fn issue_invoice(&self, document: &InvoiceDocument) -> GatewayResult<StampedDocument> {
        let request = self.client.post(self.url("invoices")).json(document);
        self.send_json("issue_invoice", request).await
    }

    #[instrument(skip(self, document), fields(issuer = %document.issuer_rfc))]
    async fn issue_payment_complement(
        &self,
        document: &PaymentComplementDocument,
    ) -> GatewayResult<StampedDocument> {
        let request = self.client.post(self.url("payment-complements")).json(document);
        self.send_json("issue_payment_complement", request).await
    }

    #[instrument(skip(self))]
    async fn fetch_pdf(&self, provider_id: &str) -> GatewayResult<Vec<u8>> {
        let request = self
            .client
            .get(self.url(&format!("invoices/{}/pdf", provider_id)));
        self.send_ok("fetch_pdf", request).await
    }

    #[instrument(skip(self))]
    async fn fetch_xml(&self, provider_id: &str) -> GatewayResult<Vec<u8>> {
        let request = self
            .client
            .get(self.url(&format!("invoices/{}/xml", provider_id)));
        self.send_ok("fetch_xml", request).await
    }

    #[instrument(skip(self), fields(motive = motive.code()))]
    async fn cancel(
        &self,
        provider_id: &str,
        motive: CancellationMotive,
        replacement_uuid: Option<&str>,
    ) -> GatewayResult<CancellationReceipt> {
        let mut query = vec![("motive", motive.code())];
        if let Some(uuid) = replacement_uuid {
            query.push(("substitution", uuid));
        }
        let request = self
            .client
            .delete(self.url(&format!("invoices/{}", provider_id)))
            .query(&query);

        let payload: serde_json::Value = self.send_json("cancel", request).await?;
        let body: CancellationBody = serde_json::from_value(payload.clone())
            .map_err(|e| unreadable_response("cancel", &e))?;

        Ok(CancellationReceipt {
            status: body.status,
            payload,
        })
    }
}
