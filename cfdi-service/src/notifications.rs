//! Invoice notifications: the notifier interface and the mail templates.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier not configured")]
    NotConfigured,

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub template: &'static str,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// One order row of an aggregate notification.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub order_number: String,
    pub delivery_date: Option<NaiveDate>,
    pub total: Decimal,
}

/// Fields shared by every invoice template.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSummary<'a> {
    pub supplier_name: &'a str,
    pub receiver_name: &'a str,
    pub folio: i64,
    pub series: Option<&'a str>,
    pub fiscal_uuid: &'a str,
    pub total: Decimal,
}

impl InvoiceSummary<'_> {
    fn folio_label(&self) -> String {
        match self.series {
            Some(series) => format!("{}-{}", series, self.folio),
            None => self.folio.to_string(),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn header(summary: &InvoiceSummary<'_>) -> String {
    format!(
        "<p>{} ha emitido la factura <strong>{}</strong> a nombre de {}.</p>\
         <p>Folio fiscal: {}<br/>Total: ${:.2}</p>",
        escape(summary.supplier_name),
        escape(&summary.folio_label()),
        escape(summary.receiver_name),
        escape(summary.fiscal_uuid),
        summary.total,
    )
}

pub fn render_order_invoice(
    summary: &InvoiceSummary<'_>,
    order_number: &str,
    delivery_date: Option<NaiveDate>,
) -> (String, String) {
    let subject = format!(
        "Factura {} - Pedido {}",
        summary.folio_label(),
        order_number
    );
    let delivery = delivery_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    let html = format!(
        "<html><body>{}<p>Pedido: {}<br/>Fecha de entrega: {}</p></body></html>",
        header(summary),
        escape(order_number),
        delivery,
    );
    (subject, html)
}

/// Consolidated invoices list every order in a table.
pub fn render_consolidated_invoice(
    summary: &InvoiceSummary<'_>,
    rows: &[OrderRow],
) -> (String, String) {
    let subject = format!(
        "Factura consolidada {} - {} pedidos",
        summary.folio_label(),
        rows.len()
    );
    let body: String = rows
        .iter()
        .map(|row| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>${:.2}</td></tr>",
                escape(&row.order_number),
                row.delivery_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                row.total,
            )
        })
        .collect();
    let html = format!(
        "<html><body>{}<table><thead><tr><th>Pedido</th><th>Entrega</th><th>Total</th></tr></thead>\
         <tbody>{}</tbody></table></body></html>",
        header(summary),
        body,
    );
    (subject, html)
}

pub fn render_payment_complement(
    summary: &InvoiceSummary<'_>,
    related_folios: &[String],
) -> (String, String) {
    let subject = format!("Complemento de pago {}", summary.folio_label());
    let html = format!(
        "<html><body>{}<p>Facturas pagadas: {}</p></body></html>",
        header(summary),
        escape(&related_folios.join(", ")),
    );
    (subject, html)
}
