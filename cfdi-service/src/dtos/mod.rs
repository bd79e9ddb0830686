//! Request bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::engine::{ConsolidationRequest, IssueRequest};
use crate::models::{
    CancellationMotive, CfdiType, ComplementAmounts, PaymentForm, PaymentMethod, PaymentReceipt,
};

#[derive(Debug, Deserialize, Validate)]
pub struct IssueInvoiceRequest {
    pub order_details_id: Uuid,
    pub cfdi_type: CfdiType,
    pub payment_form: PaymentForm,
    pub payment_method: PaymentMethod,
    #[validate(length(equal = 5, message = "expedition place must be a 5 digit zip code"))]
    pub expedition_place: Option<String>,
    pub issue_date: Option<DateTime<Utc>>,
}

impl From<IssueInvoiceRequest> for IssueRequest {
    fn from(req: IssueInvoiceRequest) -> Self {
        IssueRequest {
            order_details_id: req.order_details_id,
            cfdi_type: req.cfdi_type,
            payment_form: req.payment_form,
            expedition_place: req.expedition_place,
            issue_date: req.issue_date,
            payment_method: req.payment_method,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConsolidatedInvoiceRequest {
    #[validate(length(min = 1, message = "at least one order is required"))]
    pub order_ids: Vec<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub public_general: bool,
    pub payment_form: Option<PaymentForm>,
    #[validate(length(equal = 5, message = "expedition place must be a 5 digit zip code"))]
    pub expedition_place: Option<String>,
}

impl From<ConsolidatedInvoiceRequest> for ConsolidationRequest {
    fn from(req: ConsolidatedInvoiceRequest) -> Self {
        ConsolidationRequest {
            order_ids: req.order_ids,
            payment_method: req.payment_method,
            public_general: req.public_general,
            payment_form: req.payment_form,
            expedition_place: req.expedition_place,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentComplementRequest {
    pub payment_receipt_id: Uuid,
    pub payment_form: PaymentForm,
    pub paid_utc: DateTime<Utc>,
    #[validate(length(max = 1000))]
    pub comments: Option<String>,
    #[validate(length(min = 1, message = "at least one order is required"))]
    pub order_details_ids: Vec<Uuid>,
    pub amounts: ComplementAmounts,
}

impl PaymentComplementRequest {
    pub fn receipt(&self) -> PaymentReceipt {
        PaymentReceipt {
            payment_receipt_id: self.payment_receipt_id,
            payment_form: self.payment_form.clone(),
            paid_utc: self.paid_utc,
            comments: self.comments.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReissueRequest {
    pub old_order_details_id: Uuid,
    pub new_order_details_id: Uuid,
}

/// Query string of `DELETE /orders/:order_id/invoice`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelInvoiceParams {
    pub motive: Option<CancellationMotive>,
    #[validate(length(equal = 36, message = "replacement must be a fiscal UUID"))]
    pub replacement_uuid: Option<String>,
}
