//! PostgreSQL store for cfdi-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CfdiError, CfdiResult};
use crate::models::{
    Actor, BranchFiscal, CartLine, CfdiType, ComplementLink, ComplementStatus, FiscalCertificate,
    Invoice, InvoiceComplement, InvoiceStatus, InvoicingOptions, NewComplement, NewInvoice, Order,
    OrderDetails, PaymentForm, PaymentMethod, RestaurantBranch, SupplierBusiness, SupplierUnit,
};
use crate::repository::{
    ActorDirectory, BranchRepository, CartRepository, CertificateRepository, FolioSequence,
    InvoiceRepository, OrderRepository, SupplierRepository,
};
use crate::services::metrics::DB_QUERY_DURATION;

const INVOICE_COLUMNS: &str = "i.invoice_id, i.provider_id, i.fiscal_uuid, i.folio, i.series, \
     i.supplier_business_id, i.restaurant_branch_id, i.cfdi_type, i.payment_method, \
     i.payment_form, i.subtotal, i.tax, i.total, i.status, i.created_by, i.cancel_result, \
     i.created_utc, i.canceled_utc";

fn db_error(context: &str, e: sqlx::Error) -> CfdiError {
    CfdiError::Unexpected(anyhow::anyhow!("{}: {}", context, e))
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    provider_id: String,
    fiscal_uuid: String,
    folio: i64,
    series: Option<String>,
    supplier_business_id: Uuid,
    restaurant_branch_id: Uuid,
    cfdi_type: String,
    payment_method: String,
    payment_form: String,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
    status: String,
    created_by: Uuid,
    cancel_result: Option<serde_json::Value>,
    created_utc: DateTime<Utc>,
    canceled_utc: Option<DateTime<Utc>>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = CfdiError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let cfdi_type = CfdiType::parse(row.cfdi_type.trim()).ok_or_else(|| {
            CfdiError::Unexpected(anyhow::anyhow!("stored cfdi type '{}'", row.cfdi_type))
        })?;
        let payment_method = PaymentMethod::parse(row.payment_method.trim()).ok_or_else(|| {
            CfdiError::Unexpected(anyhow::anyhow!(
                "stored payment method '{}'",
                row.payment_method
            ))
        })?;
        let payment_form = PaymentForm::new(row.payment_form.trim())
            .map_err(|e| CfdiError::Unexpected(anyhow::anyhow!(e)))?;

        Ok(Invoice {
            invoice_id: row.invoice_id,
            provider_id: row.provider_id,
            fiscal_uuid: row.fiscal_uuid,
            folio: row.folio,
            series: row.series,
            supplier_business_id: row.supplier_business_id,
            restaurant_branch_id: row.restaurant_branch_id,
            cfdi_type,
            payment_method,
            payment_form,
            subtotal: row.subtotal,
            tax: row.tax,
            total: row.total,
            status: InvoiceStatus::from_string(&row.status),
            created_by: row.created_by,
            cancel_result: row.cancel_result,
            created_utc: row.created_utc,
            canceled_utc: row.canceled_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct ComplementRow {
    complement_id: Uuid,
    invoice_id: Uuid,
    provider_id: String,
    fiscal_uuid: String,
    amount: Decimal,
    status: String,
    created_by: Uuid,
    created_utc: DateTime<Utc>,
}

impl From<ComplementRow> for InvoiceComplement {
    fn from(row: ComplementRow) -> Self {
        InvoiceComplement {
            complement_id: row.complement_id,
            invoice_id: row.invoice_id,
            provider_id: row.provider_id,
            fiscal_uuid: row.fiscal_uuid,
            amount: row.amount,
            status: ComplementStatus::from_string(&row.status),
            created_by: row.created_by,
            created_utc: row.created_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct CertificateRow {
    supplier_business_id: Uuid,
    rfc: String,
    legal_name: String,
    tax_regime: String,
    zip_code: String,
    invoicing_options: serde_json::Value,
}

/// Implements every collaborator repository over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url), fields(service = "cfdi-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_invoice(&self, label: &str, sql: &str, id: Uuid) -> CfdiResult<Option<Invoice>> {
        let timer = DB_QUERY_DURATION.with_label_values(&[label]).start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(label, e))?;

        timer.observe_duration();
        row.map(Invoice::try_from).transpose()
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn get_order(&self, order_id: Uuid) -> CfdiResult<Option<Order>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, order_number, restaurant_branch_id, supplier_unit_id, created_by, created_utc
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get order", e))?;

        timer.observe_duration();
        Ok(order)
    }

    #[instrument(skip(self), fields(order_details_id = %order_details_id))]
    async fn get_order_details(&self, order_details_id: Uuid) -> CfdiResult<Option<OrderDetails>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_details"])
            .start_timer();

        let details = sqlx::query_as::<_, OrderDetails>(
            r#"
            SELECT order_details_id, order_id, version, cart_id, subtotal, tax, shipping_cost, total,
                   delivery_date, status, comments, created_by, created_utc
            FROM order_details
            WHERE order_details_id = $1
            "#,
        )
        .bind(order_details_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get order details", e))?;

        timer.observe_duration();
        Ok(details)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn latest_order_details(&self, order_id: Uuid) -> CfdiResult<Option<OrderDetails>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_order_details"])
            .start_timer();

        let details = sqlx::query_as::<_, OrderDetails>(
            r#"
            SELECT order_details_id, order_id, version, cart_id, subtotal, tax, shipping_cost, total,
                   delivery_date, status, comments, created_by, created_utc
            FROM order_details
            WHERE order_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get latest order details", e))?;

        timer.observe_duration();
        Ok(details)
    }

    #[instrument(skip(self, details), fields(order_id = %details.order_id, version = details.version))]
    async fn insert_order_details(&self, details: &OrderDetails) -> CfdiResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order_details"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO order_details (order_details_id, order_id, version, cart_id, subtotal, tax,
                                       shipping_cost, total, delivery_date, status, comments,
                                       created_by, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(details.order_details_id)
        .bind(details.order_id)
        .bind(details.version)
        .bind(details.cart_id)
        .bind(details.subtotal)
        .bind(details.tax)
        .bind(details.shipping_cost)
        .bind(details.total)
        .bind(details.delivery_date)
        .bind(&details.status)
        .bind(&details.comments)
        .bind(details.created_by)
        .bind(details.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert order details", e))?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl CartRepository for PgStore {
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    async fn cart_lines(&self, cart_id: Uuid) -> CfdiResult<Vec<CartLine>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cart_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, CartLine>(
            r#"
            SELECT p.product_id, p.description, p.product_key, p.unit_key, p.unit_name,
                   c.quantity, c.subtotal, p.tax_rate, p.excise_rate
            FROM cart_items c
            JOIN products p ON p.product_id = c.product_id
            WHERE c.cart_id = $1
            "#,
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get cart lines", e))?;

        timer.observe_duration();
        Ok(lines)
    }
}

#[async_trait]
impl SupplierRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_business(
        &self,
        supplier_business_id: Uuid,
    ) -> CfdiResult<Option<SupplierBusiness>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_business"])
            .start_timer();

        let business = sqlx::query_as::<_, SupplierBusiness>(
            "SELECT supplier_business_id, name, notification_email FROM supplier_businesses WHERE supplier_business_id = $1",
        )
        .bind(supplier_business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get supplier business", e))?;

        timer.observe_duration();
        Ok(business)
    }

    #[instrument(skip(self))]
    async fn get_unit(&self, supplier_unit_id: Uuid) -> CfdiResult<Option<SupplierUnit>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_unit"])
            .start_timer();

        let unit = sqlx::query_as::<_, SupplierUnit>(
            r#"
            SELECT supplier_unit_id, supplier_business_id, unit_name, zip_code, invoice_series
            FROM supplier_units
            WHERE supplier_unit_id = $1
            "#,
        )
        .bind(supplier_unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get supplier unit", e))?;

        timer.observe_duration();
        Ok(unit)
    }
}

#[async_trait]
impl BranchRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_branch(&self, restaurant_branch_id: Uuid) -> CfdiResult<Option<RestaurantBranch>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_branch"])
            .start_timer();

        let branch = sqlx::query_as::<_, RestaurantBranch>(
            "SELECT restaurant_branch_id, restaurant_business_id, branch_name FROM restaurant_branches WHERE restaurant_branch_id = $1",
        )
        .bind(restaurant_branch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get restaurant branch", e))?;

        timer.observe_duration();
        Ok(branch)
    }

    #[instrument(skip(self))]
    async fn get_branch_fiscal(&self, restaurant_branch_id: Uuid) -> CfdiResult<Option<BranchFiscal>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_branch_fiscal"])
            .start_timer();

        let fiscal = sqlx::query_as::<_, BranchFiscal>(
            r#"
            SELECT restaurant_branch_id, rfc, legal_name, tax_regime, zip_code, cfdi_use, email,
                   provider_customer_id
            FROM branch_fiscal
            WHERE restaurant_branch_id = $1
            "#,
        )
        .bind(restaurant_branch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get branch fiscal data", e))?;

        timer.observe_duration();
        Ok(fiscal)
    }

    #[instrument(skip(self))]
    async fn set_provider_customer_id(
        &self,
        restaurant_branch_id: Uuid,
        customer_id: &str,
    ) -> CfdiResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_provider_customer_id"])
            .start_timer();

        // Never overwrite an id another request registered first.
        sqlx::query(
            r#"
            UPDATE branch_fiscal
            SET provider_customer_id = $2
            WHERE restaurant_branch_id = $1 AND provider_customer_id IS NULL
            "#,
        )
        .bind(restaurant_branch_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to store provider customer id", e))?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl CertificateRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_certificate(
        &self,
        supplier_business_id: Uuid,
    ) -> CfdiResult<Option<FiscalCertificate>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_certificate"])
            .start_timer();

        let row = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT supplier_business_id, rfc, legal_name, tax_regime, zip_code, invoicing_options
            FROM fiscal_certificates
            WHERE supplier_business_id = $1
            "#,
        )
        .bind(supplier_business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get fiscal certificate", e))?;

        timer.observe_duration();

        row.map(|row| {
            let invoicing_options: InvoicingOptions =
                serde_json::from_value(row.invoicing_options).map_err(|e| {
                    CfdiError::Unexpected(anyhow::anyhow!("invalid invoicing options: {}", e))
                })?;
            Ok(FiscalCertificate {
                supplier_business_id: row.supplier_business_id,
                rfc: row.rfc,
                legal_name: row.legal_name,
                tax_regime: row.tax_regime,
                zip_code: row.zip_code,
                invoicing_options,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl InvoiceRepository for PgStore {
    #[instrument(skip(self), fields(order_details_id = %order_details_id))]
    async fn active_invoice_for_details(
        &self,
        order_details_id: Uuid,
    ) -> CfdiResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices i \
             JOIN invoice_orders io ON io.invoice_id = i.invoice_id \
             WHERE io.order_details_id = $1 AND io.active AND i.status = 'ACTIVE'",
            INVOICE_COLUMNS
        );
        self.fetch_invoice("active_invoice_for_details", &sql, order_details_id)
            .await
    }

    #[instrument(skip(self), fields(order_details_id = %order_details_id))]
    async fn latest_invoice_for_details(
        &self,
        order_details_id: Uuid,
    ) -> CfdiResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices i \
             JOIN invoice_orders io ON io.invoice_id = i.invoice_id \
             WHERE io.order_details_id = $1 \
             ORDER BY i.created_utc DESC LIMIT 1",
            INVOICE_COLUMNS
        );
        self.fetch_invoice("latest_invoice_for_details", &sql, order_details_id)
            .await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn current_invoice_for_order(&self, order_id: Uuid) -> CfdiResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices i \
             JOIN invoice_orders io ON io.invoice_id = i.invoice_id \
             JOIN order_details od ON od.order_details_id = io.order_details_id \
             WHERE od.order_id = $1 \
             ORDER BY (i.status = 'ACTIVE') DESC, i.created_utc DESC LIMIT 1",
            INVOICE_COLUMNS
        );
        self.fetch_invoice("current_invoice_for_order", &sql, order_id)
            .await
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn order_details_for_invoice(&self, invoice_id: Uuid) -> CfdiResult<Vec<Uuid>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["order_details_for_invoice"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT order_details_id FROM invoice_orders WHERE invoice_id = $1 ORDER BY created_utc, order_details_id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list invoice orders", e))?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self, invoice, order_details_ids), fields(fiscal_uuid = %invoice.fiscal_uuid))]
    async fn create_invoice(
        &self,
        invoice: &NewInvoice,
        order_details_ids: &[Uuid],
    ) -> CfdiResult<Invoice> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let invoice_id = Uuid::new_v4();
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            INSERT INTO invoices (invoice_id, provider_id, fiscal_uuid, folio, series,
                                  supplier_business_id, restaurant_branch_id, cfdi_type,
                                  payment_method, payment_form, subtotal, tax, total, status,
                                  created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'ACTIVE', $14)
            RETURNING invoice_id, provider_id, fiscal_uuid, folio, series, supplier_business_id,
                      restaurant_branch_id, cfdi_type, payment_method, payment_form, subtotal, tax,
                      total, status, created_by, cancel_result, created_utc, canceled_utc
            "#,
        )
        .bind(invoice_id)
        .bind(&invoice.provider_id)
        .bind(&invoice.fiscal_uuid)
        .bind(invoice.folio)
        .bind(&invoice.series)
        .bind(invoice.supplier_business_id)
        .bind(invoice.restaurant_branch_id)
        .bind(invoice.cfdi_type.as_str())
        .bind(invoice.payment_method.as_str())
        .bind(invoice.payment_form.as_str())
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(invoice.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert invoice", e))?;

        for order_details_id in order_details_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO invoice_orders (invoice_id, order_details_id, active, created_by)
                VALUES ($1, $2, TRUE, $3)
                "#,
            )
            .bind(invoice_id)
            .bind(order_details_id)
            .bind(invoice.created_by)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                    tx.rollback().await.ok();
                    return Err(CfdiError::DuplicateInvoice {
                        order_details_id: *order_details_id,
                    });
                }
                Err(e) => return Err(db_error("Failed to associate order", e)),
            }
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, orders = order_details_ids.len(), "Invoice persisted");

        Invoice::try_from(row)
    }

    #[instrument(skip(self, payload), fields(invoice_id = %invoice_id, canceled = canceled))]
    async fn record_cancellation(
        &self,
        invoice_id: Uuid,
        payload: &serde_json::Value,
        canceled: bool,
    ) -> CfdiResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_cancellation"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET cancel_result = $2,
                status = CASE WHEN $3 THEN 'CANCELED' ELSE status END,
                canceled_utc = CASE WHEN $3 THEN NOW() ELSE canceled_utc END
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(payload)
        .bind(canceled)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to record cancellation", e))?;

        if canceled {
            sqlx::query("UPDATE invoice_orders SET active = FALSE WHERE invoice_id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to release invoice orders", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn complements_for_invoice(&self, invoice_id: Uuid) -> CfdiResult<Vec<InvoiceComplement>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complements_for_invoice"])
            .start_timer();

        let rows = sqlx::query_as::<_, ComplementRow>(
            r#"
            SELECT complement_id, invoice_id, provider_id, fiscal_uuid, amount, status, created_by,
                   created_utc
            FROM invoice_complements
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list complements", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(InvoiceComplement::from).collect())
    }

    #[instrument(skip(self, complements, links), fields(complements = complements.len()))]
    async fn create_complements(
        &self,
        complements: &[NewComplement],
        links: &[ComplementLink],
    ) -> CfdiResult<Vec<InvoiceComplement>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_complements"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let mut stored = Vec::with_capacity(complements.len());
        for complement in complements {
            let row = sqlx::query_as::<_, ComplementRow>(
                r#"
                INSERT INTO invoice_complements (complement_id, invoice_id, provider_id, fiscal_uuid,
                                                 amount, status, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING complement_id, invoice_id, provider_id, fiscal_uuid, amount, status,
                          created_by, created_utc
                "#,
            )
            .bind(complement.complement_id)
            .bind(complement.invoice_id)
            .bind(&complement.provider_id)
            .bind(&complement.fiscal_uuid)
            .bind(complement.amount)
            .bind(ComplementStatus::Active.as_str())
            .bind(complement.created_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert complement", e))?;
            stored.push(InvoiceComplement::from(row));
        }

        for link in links {
            sqlx::query(
                r#"
                INSERT INTO complement_links (payment_receipt_id, order_details_id, complement_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(link.payment_receipt_id)
            .bind(link.order_details_id)
            .bind(link.complement_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to link complement", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();
        Ok(stored)
    }
}

#[async_trait]
impl FolioSequence for PgStore {
    /// Row-locked counter; concurrent callers serialize on the business's row.
    #[instrument(skip(self))]
    async fn next_folio(&self, supplier_business_id: Uuid) -> CfdiResult<i64> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_folio"])
            .start_timer();

        let folio = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO folio_counters (supplier_business_id, last_folio)
            VALUES ($1, 1)
            ON CONFLICT (supplier_business_id)
            DO UPDATE SET last_folio = folio_counters.last_folio + 1
            RETURNING last_folio
            "#,
        )
        .bind(supplier_business_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to assign folio", e))?;

        timer.observe_duration();
        Ok(folio)
    }
}

#[async_trait]
impl ActorDirectory for PgStore {
    #[instrument(skip(self))]
    async fn find_by_external_id(&self, external_id: &str) -> CfdiResult<Option<Actor>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_actor"])
            .start_timer();

        let actor = sqlx::query_as::<_, Actor>(
            "SELECT actor_id, external_id, name, email FROM actors WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find actor", e))?;

        timer.observe_duration();
        Ok(actor)
    }
}
