#![allow(dead_code)]

use async_trait::async_trait;
use cfdi_service::config::FiscalConfig;
use cfdi_service::engine::{Collaborators, InvoiceEngine};
use cfdi_service::error::{CfdiError, CfdiResult};
use cfdi_service::gateway::MockFiscalProvider;
use cfdi_service::models::{
    Actor, ActorRef, BranchFiscal, CartLine, ComplementLink, ComplementStatus, FiscalCertificate,
    Invoice, InvoiceComplement, InvoiceStatus, InvoicingOptions, NewComplement, NewInvoice, Order,
    OrderDetails, PaymentForm, PaymentMethod, RestaurantBranch, SupplierBusiness, SupplierUnit,
};
use cfdi_service::notifications::{Notification, Notifier, NotifyError};
use cfdi_service::repository::{
    ActorDirectory, BranchRepository, CartRepository, CertificateRepository, FolioSequence,
    InvoiceRepository, OrderRepository, SupplierRepository,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const ISSUER_RFC: &str = "AAA010101AAA";
pub const RECEIVER_RFC: &str = "BBB010101BBB";
pub const ACTOR_EXTERNAL_ID: &str = "auth0|buyer-1";
pub const BRANCH_EMAIL: &str = "compras@restaurante.mx";
pub const SUPPLIER_EMAIL: &str = "facturas@proveedor.mx";

#[derive(Debug, Clone)]
struct Association {
    invoice_id: Uuid,
    order_details_id: Uuid,
    active: bool,
}

#[derive(Default)]
struct StoreState {
    actors: Vec<Actor>,
    businesses: HashMap<Uuid, SupplierBusiness>,
    units: HashMap<Uuid, SupplierUnit>,
    certificates: HashMap<Uuid, FiscalCertificate>,
    branches: HashMap<Uuid, RestaurantBranch>,
    branch_fiscal: HashMap<Uuid, BranchFiscal>,
    orders: HashMap<Uuid, Order>,
    details: Vec<OrderDetails>,
    carts: HashMap<Uuid, Vec<CartLine>>,
    folios: HashMap<Uuid, i64>,
    invoices: Vec<Invoice>,
    associations: Vec<Association>,
    complements: Vec<InvoiceComplement>,
    links: Vec<ComplementLink>,
}

/// Every repository trait over plain collections.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.state().invoices.clone()
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Invoice {
        self.state()
            .invoices
            .iter()
            .find(|i| i.invoice_id == invoice_id)
            .cloned()
            .expect("invoice exists")
    }

    pub fn details_of(&self, order_id: Uuid) -> Vec<OrderDetails> {
        let mut details: Vec<OrderDetails> = self
            .state()
            .details
            .iter()
            .filter(|d| d.order_id == order_id)
            .cloned()
            .collect();
        details.sort_by_key(|d| d.version);
        details
    }

    pub fn complements(&self) -> Vec<InvoiceComplement> {
        self.state().complements.clone()
    }

    pub fn links(&self) -> Vec<ComplementLink> {
        self.state().links.clone()
    }

    pub fn last_folio(&self, supplier_business_id: Uuid) -> Option<i64> {
        self.state().folios.get(&supplier_business_id).copied()
    }

    pub fn branch_fiscal(&self, branch_id: Uuid) -> BranchFiscal {
        self.state().branch_fiscal[&branch_id].clone()
    }

    pub fn set_invoicing_options(&self, supplier_business_id: Uuid, options: InvoicingOptions) {
        if let Some(cert) = self.state().certificates.get_mut(&supplier_business_id) {
            cert.invoicing_options = options;
        }
    }

    pub fn set_branch_rfc(&self, branch_id: Uuid, rfc: &str) {
        if let Some(fiscal) = self.state().branch_fiscal.get_mut(&branch_id) {
            fiscal.rfc = rfc.to_string();
        }
    }

    pub fn set_branch_email(&self, branch_id: Uuid, email: Option<&str>) {
        if let Some(fiscal) = self.state().branch_fiscal.get_mut(&branch_id) {
            fiscal.email = email.map(str::to_string);
        }
    }

    pub fn remove_business_email(&self, supplier_business_id: Uuid) {
        if let Some(business) = self.state().businesses.get_mut(&supplier_business_id) {
            business.notification_email = None;
        }
    }

    pub fn set_recorded_tax(&self, order_details_id: Uuid, tax: Decimal) {
        if let Some(d) = self
            .state()
            .details
            .iter_mut()
            .find(|d| d.order_details_id == order_details_id)
        {
            d.tax = tax;
        }
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get_order(&self, order_id: Uuid) -> CfdiResult<Option<Order>> {
        Ok(self.state().orders.get(&order_id).cloned())
    }

    async fn get_order_details(&self, order_details_id: Uuid) -> CfdiResult<Option<OrderDetails>> {
        Ok(self
            .state()
            .details
            .iter()
            .find(|d| d.order_details_id == order_details_id)
            .cloned())
    }

    async fn latest_order_details(&self, order_id: Uuid) -> CfdiResult<Option<OrderDetails>> {
        Ok(self
            .state()
            .details
            .iter()
            .filter(|d| d.order_id == order_id)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn insert_order_details(&self, details: &OrderDetails) -> CfdiResult<()> {
        let mut state = self.state();
        if state
            .details
            .iter()
            .any(|d| d.order_id == details.order_id && d.version == details.version)
        {
            return Err(CfdiError::Unexpected(anyhow::anyhow!("version already exists")));
        }
        state.details.push(details.clone());
        Ok(())
    }
}

#[async_trait]
impl CartRepository for InMemoryStore {
    async fn cart_lines(&self, cart_id: Uuid) -> CfdiResult<Vec<CartLine>> {
        Ok(self.state().carts.get(&cart_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SupplierRepository for InMemoryStore {
    async fn get_business(
        &self,
        supplier_business_id: Uuid,
    ) -> CfdiResult<Option<SupplierBusiness>> {
        Ok(self.state().businesses.get(&supplier_business_id).cloned())
    }

    async fn get_unit(&self, supplier_unit_id: Uuid) -> CfdiResult<Option<SupplierUnit>> {
        Ok(self.state().units.get(&supplier_unit_id).cloned())
    }
}

#[async_trait]
impl BranchRepository for InMemoryStore {
    async fn get_branch(&self, restaurant_branch_id: Uuid) -> CfdiResult<Option<RestaurantBranch>> {
        Ok(self.state().branches.get(&restaurant_branch_id).cloned())
    }

    async fn get_branch_fiscal(&self, restaurant_branch_id: Uuid) -> CfdiResult<Option<BranchFiscal>> {
        Ok(self.state().branch_fiscal.get(&restaurant_branch_id).cloned())
    }

    async fn set_provider_customer_id(
        &self,
        restaurant_branch_id: Uuid,
        customer_id: &str,
    ) -> CfdiResult<()> {
        if let Some(fiscal) = self.state().branch_fiscal.get_mut(&restaurant_branch_id) {
            if fiscal.provider_customer_id.is_none() {
                fiscal.provider_customer_id = Some(customer_id.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateRepository for InMemoryStore {
    async fn get_certificate(
        &self,
        supplier_business_id: Uuid,
    ) -> CfdiResult<Option<FiscalCertificate>> {
        Ok(self.state().certificates.get(&supplier_business_id).cloned())
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryStore {
    async fn active_invoice_for_details(
        &self,
        order_details_id: Uuid,
    ) -> CfdiResult<Option<Invoice>> {
        let state = self.state();
        Ok(state
            .associations
            .iter()
            .filter(|a| a.order_details_id == order_details_id && a.active)
            .filter_map(|a| state.invoices.iter().find(|i| i.invoice_id == a.invoice_id))
            .find(|i| i.is_active())
            .cloned())
    }

    async fn latest_invoice_for_details(
        &self,
        order_details_id: Uuid,
    ) -> CfdiResult<Option<Invoice>> {
        let state = self.state();
        Ok(state
            .associations
            .iter()
            .rev()
            .filter(|a| a.order_details_id == order_details_id)
            .filter_map(|a| state.invoices.iter().find(|i| i.invoice_id == a.invoice_id))
            .next()
            .cloned())
    }

    async fn current_invoice_for_order(&self, order_id: Uuid) -> CfdiResult<Option<Invoice>> {
        let state = self.state();
        let detail_ids: Vec<Uuid> = state
            .details
            .iter()
            .filter(|d| d.order_id == order_id)
            .map(|d| d.order_details_id)
            .collect();
        let candidates: Vec<&Invoice> = state
            .associations
            .iter()
            .rev()
            .filter(|a| detail_ids.contains(&a.order_details_id))
            .filter_map(|a| state.invoices.iter().find(|i| i.invoice_id == a.invoice_id))
            .collect();
        Ok(candidates
            .iter()
            .find(|i| i.is_active())
            .or_else(|| candidates.first())
            .map(|i| (*i).clone()))
    }

    async fn order_details_for_invoice(&self, invoice_id: Uuid) -> CfdiResult<Vec<Uuid>> {
        Ok(self
            .state()
            .associations
            .iter()
            .filter(|a| a.invoice_id == invoice_id)
            .map(|a| a.order_details_id)
            .collect())
    }

    async fn create_invoice(
        &self,
        invoice: &NewInvoice,
        order_details_ids: &[Uuid],
    ) -> CfdiResult<Invoice> {
        let mut state = self.state();
        for id in order_details_ids {
            if state
                .associations
                .iter()
                .any(|a| a.order_details_id == *id && a.active)
            {
                return Err(CfdiError::DuplicateInvoice {
                    order_details_id: *id,
                });
            }
        }

        let stored = Invoice {
            invoice_id: Uuid::new_v4(),
            provider_id: invoice.provider_id.clone(),
            fiscal_uuid: invoice.fiscal_uuid.clone(),
            folio: invoice.folio,
            series: invoice.series.clone(),
            supplier_business_id: invoice.supplier_business_id,
            restaurant_branch_id: invoice.restaurant_branch_id,
            cfdi_type: invoice.cfdi_type,
            payment_method: invoice.payment_method,
            payment_form: invoice.payment_form.clone(),
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            status: InvoiceStatus::Active,
            created_by: invoice.created_by,
            cancel_result: None,
            created_utc: Utc::now(),
            canceled_utc: None,
        };
        state.invoices.push(stored.clone());
        for id in order_details_ids {
            state.associations.push(Association {
                invoice_id: stored.invoice_id,
                order_details_id: *id,
                active: true,
            });
        }
        Ok(stored)
    }

    async fn record_cancellation(
        &self,
        invoice_id: Uuid,
        payload: &serde_json::Value,
        canceled: bool,
    ) -> CfdiResult<()> {
        let mut state = self.state();
        if let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice_id)
        {
            invoice.cancel_result = Some(payload.clone());
            if canceled {
                invoice.status = InvoiceStatus::Canceled;
                invoice.canceled_utc = Some(Utc::now());
            }
        }
        if canceled {
            for a in state
                .associations
                .iter_mut()
                .filter(|a| a.invoice_id == invoice_id)
            {
                a.active = false;
            }
        }
        Ok(())
    }

    async fn complements_for_invoice(&self, invoice_id: Uuid) -> CfdiResult<Vec<InvoiceComplement>> {
        Ok(self
            .state()
            .complements
            .iter()
            .filter(|c| c.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn create_complements(
        &self,
        complements: &[NewComplement],
        links: &[ComplementLink],
    ) -> CfdiResult<Vec<InvoiceComplement>> {
        let mut state = self.state();
        let stored: Vec<InvoiceComplement> = complements
            .iter()
            .map(|c| InvoiceComplement {
                complement_id: c.complement_id,
                invoice_id: c.invoice_id,
                provider_id: c.provider_id.clone(),
                fiscal_uuid: c.fiscal_uuid.clone(),
                amount: c.amount,
                status: ComplementStatus::Active,
                created_by: c.created_by,
                created_utc: Utc::now(),
            })
            .collect();
        state.complements.extend(stored.iter().cloned());
        state.links.extend(links.iter().cloned());
        Ok(stored)
    }
}

#[async_trait]
impl FolioSequence for InMemoryStore {
    async fn next_folio(&self, supplier_business_id: Uuid) -> CfdiResult<i64> {
        let mut state = self.state();
        let folio = state.folios.entry(supplier_business_id).or_insert(0);
        *folio += 1;
        Ok(*folio)
    }
}

#[async_trait]
impl ActorDirectory for InMemoryStore {
    async fn find_by_external_id(&self, external_id: &str) -> CfdiResult<Option<Actor>> {
        Ok(self
            .state()
            .actors
            .iter()
            .find(|a| a.external_id.as_deref() == Some(external_id))
            .cloned())
    }
}

/// Notifier that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failure: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(NotifyError::Delivery(message));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A priced cart line: description, quantity, tax-inclusive subtotal, IVA rate.
pub fn cart_line(description: &str, quantity: Decimal, gross: Decimal, tax_rate: Decimal) -> CartLine {
    CartLine {
        product_id: Uuid::new_v4(),
        description: description.to_string(),
        product_key: "50192100".to_string(),
        unit_key: "H87".to_string(),
        unit_name: "Pieza".to_string(),
        quantity: Some(quantity),
        subtotal: Some(gross),
        tax_rate: Some(tax_rate),
        excise_rate: None,
    }
}

/// One supplier unit selling to one restaurant branch, with an engine wired
/// to in-memory collaborators and the mock provider.
pub struct TestContext {
    pub engine: Arc<InvoiceEngine>,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<MockFiscalProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub actor: Actor,
    pub business_id: Uuid,
    pub unit_id: Uuid,
    pub branch_id: Uuid,
    order_seq: Mutex<u32>,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(MockFiscalProvider::new().with_issuer(ISSUER_RFC, "Proveedora SA"));
        let notifier = Arc::new(RecordingNotifier::default());

        let actor = Actor {
            actor_id: Uuid::new_v4(),
            external_id: Some(ACTOR_EXTERNAL_ID.to_string()),
            name: "Ana Compras".to_string(),
            email: Some(BRANCH_EMAIL.to_string()),
        };
        let business_id = Uuid::new_v4();
        let unit_id = Uuid::new_v4();
        let branch_id = Uuid::new_v4();

        {
            let mut state = store.state();
            state.actors.push(actor.clone());
            state.businesses.insert(
                business_id,
                SupplierBusiness {
                    supplier_business_id: business_id,
                    name: "Proveedora".to_string(),
                    notification_email: Some(SUPPLIER_EMAIL.to_string()),
                },
            );
            state.units.insert(
                unit_id,
                SupplierUnit {
                    supplier_unit_id: unit_id,
                    supplier_business_id: business_id,
                    unit_name: "CEDIS Norte".to_string(),
                    zip_code: "64000".to_string(),
                    invoice_series: Some("A".to_string()),
                },
            );
            state.certificates.insert(
                business_id,
                FiscalCertificate {
                    supplier_business_id: business_id,
                    rfc: ISSUER_RFC.to_string(),
                    legal_name: "Proveedora SA".to_string(),
                    tax_regime: "601".to_string(),
                    zip_code: "64000".to_string(),
                    invoicing_options: InvoicingOptions {
                        default_payment_method: Some(PaymentMethod::Pue),
                        default_payment_form: Some(PaymentForm::new("03").unwrap()),
                        branch_overrides: HashMap::new(),
                    },
                },
            );
            state.branches.insert(
                branch_id,
                RestaurantBranch {
                    restaurant_branch_id: branch_id,
                    restaurant_business_id: Uuid::new_v4(),
                    branch_name: "Centro".to_string(),
                },
            );
            state.branch_fiscal.insert(
                branch_id,
                BranchFiscal {
                    restaurant_branch_id: branch_id,
                    rfc: RECEIVER_RFC.to_string(),
                    legal_name: "Restaurante SA".to_string(),
                    tax_regime: "601".to_string(),
                    zip_code: "06600".to_string(),
                    cfdi_use: "G03".to_string(),
                    email: Some(BRANCH_EMAIL.to_string()),
                    provider_customer_id: None,
                },
            );
        }

        let engine = Arc::new(InvoiceEngine::new(
            Collaborators {
                orders: store.clone(),
                carts: store.clone(),
                suppliers: store.clone(),
                branches: store.clone(),
                certificates: store.clone(),
                invoices: store.clone(),
                folios: store.clone(),
                actors: store.clone(),
                notifier: notifier.clone(),
                provider: provider.clone(),
            },
            FiscalConfig::default(),
        ));

        Self {
            engine,
            store,
            provider,
            notifier,
            actor,
            business_id,
            unit_id,
            branch_id,
            order_seq: Mutex::new(0),
        }
    }

    pub fn actor_ref(&self) -> ActorRef {
        ActorRef::ByExternalId(ACTOR_EXTERNAL_ID.to_string())
    }

    /// Add another restaurant branch with its own fiscal identity.
    pub fn add_branch(&self, rfc: &str) -> Uuid {
        let branch_id = Uuid::new_v4();
        let mut state = self.store.state();
        state.branches.insert(
            branch_id,
            RestaurantBranch {
                restaurant_branch_id: branch_id,
                restaurant_business_id: Uuid::new_v4(),
                branch_name: "Sur".to_string(),
            },
        );
        state.branch_fiscal.insert(
            branch_id,
            BranchFiscal {
                restaurant_branch_id: branch_id,
                rfc: rfc.to_string(),
                legal_name: "Otro Restaurante SA".to_string(),
                tax_regime: "601".to_string(),
                zip_code: "06700".to_string(),
                cfdi_use: "G03".to_string(),
                email: None,
                provider_customer_id: None,
            },
        );
        branch_id
    }

    /// Add an order for `branch_id` whose recorded tax matches its cart.
    pub fn add_order_for(
        &self,
        branch_id: Uuid,
        lines: Vec<CartLine>,
        shipping_cost: Option<Decimal>,
    ) -> (Order, OrderDetails) {
        let number = {
            let mut seq = self.order_seq.lock().unwrap();
            *seq += 1;
            format!("PO-{:04}", *seq)
        };
        let items = cfdi_service::line_items::compile_order(
            &lines,
            shipping_cost,
            &FiscalConfig::default().shipping,
        )
        .expect("fixture cart compiles");
        let tax = cfdi_service::line_items::round2(cfdi_service::line_items::tax_total(&items));
        let subtotal = cfdi_service::line_items::round2(cfdi_service::line_items::subtotal(&items));

        let order = Order {
            order_id: Uuid::new_v4(),
            order_number: number,
            restaurant_branch_id: branch_id,
            supplier_unit_id: self.unit_id,
            created_by: self.actor.actor_id,
            created_utc: Utc::now(),
        };
        let cart_id = Uuid::new_v4();
        let details = OrderDetails {
            order_details_id: Uuid::new_v4(),
            order_id: order.order_id,
            version: 1,
            cart_id,
            subtotal,
            tax,
            shipping_cost,
            total: subtotal + tax,
            delivery_date: NaiveDate::from_ymd_opt(2024, 5, 20),
            status: "delivered".to_string(),
            comments: None,
            created_by: self.actor.actor_id,
            created_utc: Utc::now(),
        };

        let mut state = self.store.state();
        state.orders.insert(order.order_id, order.clone());
        state.details.push(details.clone());
        state.carts.insert(cart_id, lines);
        (order, details)
    }

    pub fn add_order(&self, lines: Vec<CartLine>, shipping_cost: Option<Decimal>) -> (Order, OrderDetails) {
        self.add_order_for(self.branch_id, lines, shipping_cost)
    }

    /// 116.00 of goods at 16% IVA plus 58.00 shipping: tax 24.00, total 174.00.
    pub fn add_standard_order(&self) -> (Order, OrderDetails) {
        self.add_order(
            vec![cart_line("Aguacate Hass", dec!(2), dec!(116.00), dec!(0.16))],
            Some(dec!(58.00)),
        )
    }
}
