//! Invoice lifecycle handlers. Each one validates, delegates to the engine and
//! lets `AppError` classify the failure.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    CancelInvoiceParams, ConsolidatedInvoiceRequest, IssueInvoiceRequest,
    PaymentComplementRequest, ReissueRequest,
};
use crate::middleware::ActorContext;
use crate::models::{CancellationResult, InvoiceResult, InvoiceView};
use crate::startup::AppState;

pub async fn issue_invoice(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(payload): Json<IssueInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResult>), AppError> {
    payload.validate()?;

    tracing::info!(
        order_details_id = %payload.order_details_id,
        cfdi_type = %payload.cfdi_type,
        payment_method = %payload.payment_method,
        "Issuing invoice"
    );

    let result = state.engine.issue_invoice(payload.into(), &actor).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn issue_consolidated_invoice(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(payload): Json<ConsolidatedInvoiceRequest>,
) -> Result<(StatusCode, Json<Vec<InvoiceResult>>), AppError> {
    payload.validate()?;

    tracing::info!(
        orders = payload.order_ids.len(),
        public_general = payload.public_general,
        "Issuing consolidated invoice"
    );

    let results = state
        .engine
        .issue_consolidated_invoice(payload.into(), &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(results)))
}

pub async fn issue_payment_complement(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(payload): Json<PaymentComplementRequest>,
) -> Result<(StatusCode, Json<InvoiceResult>), AppError> {
    payload.validate()?;

    tracing::info!(
        payment_receipt_id = %payload.payment_receipt_id,
        orders = payload.order_details_ids.len(),
        "Issuing payment complement"
    );

    let result = state
        .engine
        .issue_payment_complement(
            &payload.receipt(),
            &payload.order_details_ids,
            &payload.amounts,
            &actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn reissue_invoice(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Json(payload): Json<ReissueRequest>,
) -> Result<Json<CancellationResult>, AppError> {
    tracing::info!(
        old_order_details_id = %payload.old_order_details_id,
        new_order_details_id = %payload.new_order_details_id,
        "Reissuing invoice"
    );

    let result = state
        .engine
        .reissue_invoice(payload.old_order_details_id, payload.new_order_details_id)
        .await?;
    Ok(Json(result))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(order_id): Path<Uuid>,
    Query(params): Query<CancelInvoiceParams>,
) -> Result<Json<CancellationResult>, AppError> {
    params.validate()?;

    tracing::info!(
        order_id = %order_id,
        motive = params.motive.map(|m| m.code()).unwrap_or("default"),
        "Cancelling invoice"
    );

    let result = state
        .engine
        .cancel_invoice(order_id, params.motive, params.replacement_uuid, &actor)
        .await?;
    Ok(Json(result))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<InvoiceView>, AppError> {
    let view = state.engine.get_invoice(order_id).await?;
    Ok(Json(view))
}
