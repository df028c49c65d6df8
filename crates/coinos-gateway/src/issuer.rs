//! Invoice issuance for store orders

use coinos_api::InvoiceRequest;
use tracing::{debug, error, info};
use url::Url;

use crate::config::{ConversionPolicy, GatewayConfig};
use crate::error::Error;
use crate::order::{DynOrderStore, Order};
use crate::price::PriceCache;
use crate::provider::DynLightningProvider;
use crate::reconcile::ReconciliationEngine;
use crate::record::{PaymentRecord, PaymentRecordStore};
use crate::util::{fiat_to_sats, unix_time};

/// Note added when an order starts waiting for payment
pub const AWAITING_PAYMENT_NOTE: &str = "Awaiting Lightning payment";

/// Result of [`InvoiceIssuer::issue_invoice`]
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    /// The order is paid, possibly through the invoice that was about to be replaced
    Paid,
    /// A new invoice is now the order's active record
    Issued(PaymentRecord),
}

impl IssueOutcome {
    /// The issued record, if any
    pub fn into_record(self) -> Option<PaymentRecord> {
        match self {
            IssueOutcome::Paid => None,
            IssueOutcome::Issued(record) => Some(record),
        }
    }
}

/// Creates Coinos invoices for orders and stores them as payment records
#[derive(Clone)]
pub struct InvoiceIssuer {
    api_key: String,
    provider: Option<DynLightningProvider>,
    records: PaymentRecordStore,
    orders: DynOrderStore,
    prices: PriceCache,
    engine: ReconciliationEngine,
    policy: ConversionPolicy,
    store_currency: String,
    webhook_url: Option<Url>,
}

impl InvoiceIssuer {
    /// Create an issuer
    ///
    /// `provider` is `None` when the API client could not be built.
    pub fn new(
        config: &GatewayConfig,
        provider: Option<DynLightningProvider>,
        records: PaymentRecordStore,
        orders: DynOrderStore,
        prices: PriceCache,
        engine: ReconciliationEngine,
    ) -> Result<Self, Error> {
        let webhook_url = match (config.webhook_enabled, config.public_url.as_deref()) {
            (true, Some(public_url)) => Some(webhook_base_url(public_url, &config.webhook_path)?),
            _ => None,
        };

        Ok(Self {
            api_key: config.api_key.clone(),
            provider,
            records,
            orders,
            prices,
            engine,
            policy: config.conversion_policy,
            store_currency: config.store_currency.clone(),
            webhook_url,
        })
    }

    /// Webhook URL Coinos should call for `order_id`
    pub fn callback_url(&self, order_id: &str) -> Option<String> {
        self.webhook_url.as_ref().map(|base| {
            let mut url = base.clone();
            url.query_pairs_mut().append_pair("order_id", order_id);
            url.to_string()
        })
    }

    /// Reset an order for a fresh payment attempt
    ///
    /// Drops any earlier payment record and notes that payment is awaited.
    /// Returns `true`, leaving the record in place, when the earlier invoice
    /// turns out to be paid.
    pub async fn prepare_checkout(&self, order_id: &str) -> Result<bool, Error> {
        if self.orders.get_order(order_id).await?.is_none() {
            return Err(Error::OrderNotFound(order_id.to_string()));
        }

        if self.engine.settle_active_invoice(order_id).await? {
            info!("Order {} was paid by its previous invoice", order_id);
            return Ok(true);
        }

        self.records.remove(order_id).await?;
        self.orders.add_note(order_id, AWAITING_PAYMENT_NOTE).await?;

        debug!("Order {} awaiting Lightning payment", order_id);
        Ok(false)
    }

    /// Create an invoice for `order` and make it the order's active record
    ///
    /// The invoice being replaced is checked first. If it has received funds
    /// the order is marked paid and no new invoice is created.
    pub async fn issue_invoice(&self, order: &Order) -> Result<IssueOutcome, Error> {
        if self.api_key.trim().is_empty() {
            error!("Cannot create invoice for order {}: no API key", order.id);
            return Err(Error::MissingApiKey);
        }
        let provider = self.provider.as_ref().ok_or_else(|| {
            error!("Cannot create invoice for order {}: no API client", order.id);
            Error::ClientNotInitialized
        })?;

        if order.is_paid() || self.engine.settle_active_invoice(&order.id).await? {
            debug!("Order {} is paid, not issuing an invoice", order.id);
            return Ok(IssueOutcome::Paid);
        }

        if !order.total.is_finite() || order.total <= 0.0 {
            return Err(Error::Validation(format!(
                "order {} has no payable total",
                order.id
            )));
        }

        let (request, requested_sats) = match self.policy {
            ConversionPolicy::ClientConverts => {
                if !order.currency.eq_ignore_ascii_case(&self.store_currency) {
                    return Err(Error::UnsupportedCurrency(order.currency.clone()));
                }
                let rate = self.prices.get_rate().await;
                let sats = fiat_to_sats(order.total, rate);
                if sats == 0 {
                    return Err(Error::Validation(format!(
                        "order {} total is below one satoshi",
                        order.id
                    )));
                }
                (
                    InvoiceRequest::lightning_sats(sats).currency(order.currency.clone()),
                    Some(sats),
                )
            }
            ConversionPolicy::ProviderConverts => (
                InvoiceRequest::lightning_fiat(order.total, order.currency.clone()),
                None,
            ),
        };

        let mut request = request
            .secret(format!("order_{}", order.id))
            .memo(format!("Order #{}", order.number));
        if let Some(url) = self.callback_url(&order.id) {
            request = request.webhook(url);
        }

        let invoice = provider.create_invoice(request).await.map_err(|e| {
            error!("Coinos invoice creation failed for order {}: {}", order.id, e);
            Error::CoinosApi(e)
        })?;

        if invoice.hash.is_empty() {
            error!("Coinos returned an invoice without a hash for order {}", order.id);
            return Err(Error::Validation("invoice response has no hash".to_string()));
        }

        if let Some(rate) = invoice.rate {
            self.prices.record_invoice_rate(rate);
        }

        let record = PaymentRecord {
            invoice_hash: invoice.hash,
            payment_text: invoice.text,
            satoshis: requested_sats.unwrap_or(invoice.amount),
            usd_amount: order.total,
            currency: invoice.currency.unwrap_or_else(|| order.currency.clone()),
            created_at: unix_time(),
        };

        self.records.put(&order.id, &record).await?;

        info!(
            "Issued invoice {} for order {}: {} sats",
            record.invoice_hash, order.id, record.satoshis
        );

        Ok(IssueOutcome::Issued(record))
    }
}

fn webhook_base_url(public_url: &str, webhook_path: &str) -> Result<Url, Error> {
    let base = Url::parse(public_url)
        .map_err(|e| Error::Config(format!("invalid public_url: {}", e)))?;
    let path = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        webhook_path.trim_start_matches('/')
    );
    let mut url = base;
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}
