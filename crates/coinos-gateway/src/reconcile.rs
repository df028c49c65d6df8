//! Payment confirmation
//!
//! Two signals report payment: Coinos webhooks and checkout page polls. Either
//! may arrive late, twice, or concurrently with the other. Both funnel into
//! [`ReconciliationEngine::reconcile`], which relies on the order store's
//! compare-and-swap `mark_paid` so an order is marked paid, and noted, once.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::order::DynOrderStore;
use crate::provider::DynLightningProvider;
use crate::record::PaymentRecordStore;

/// What reported the payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Coinos webhook delivery
    Webhook,
    /// Checkout page poll
    Poll,
}

impl TriggerSource {
    /// Audit note recorded on the order when this source completes payment
    pub fn note(&self) -> &'static str {
        match self {
            TriggerSource::Webhook => "Lightning payment completed via Coinos webhook",
            TriggerSource::Poll => "Lightning payment completed via Coinos",
        }
    }
}

/// Result of a reconcile attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Order was already paid, nothing changed
    AlreadyPaid,
    /// This call marked the order paid
    Paid,
    /// Nothing received yet
    Waiting,
}

/// Status reported to a polling checkout page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    /// Whether the order is paid
    pub paid: bool,
    /// Status while unpaid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Satoshis received so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<u64>,
    /// Satoshis requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

impl PollStatus {
    /// Paid status
    pub fn paid() -> Self {
        Self {
            paid: true,
            status: None,
            received: None,
            amount: None,
        }
    }

    /// Still waiting for funds
    pub fn waiting(received: u64, amount: u64) -> Self {
        Self {
            paid: false,
            status: Some("waiting".to_string()),
            received: Some(received),
            amount: Some(amount),
        }
    }
}

/// Webhook payload sent by Coinos
///
/// Only `hash` is required. Other invoice fields Coinos includes are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    /// Invoice hash
    pub hash: String,
    /// Satoshis received
    #[serde(default, deserialize_with = "coinos_api::parse_u64_lenient")]
    pub received: u64,
    /// Invoice secret, `order_<id>` for gateway invoices
    #[serde(default)]
    pub secret: Option<String>,
}

/// Result of handling a webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Hash is not one of ours, or no longer active
    Ignored,
    /// Reconciled against an order
    Reconciled {
        /// Order the invoice belongs to
        order_id: String,
        /// Reconcile result
        outcome: ReconcileOutcome,
    },
}

/// Decides when orders become paid
#[derive(Clone)]
pub struct ReconciliationEngine {
    orders: DynOrderStore,
    records: PaymentRecordStore,
    provider: Option<DynLightningProvider>,
}

impl ReconciliationEngine {
    /// Create an engine
    pub fn new(
        orders: DynOrderStore,
        records: PaymentRecordStore,
        provider: Option<DynLightningProvider>,
    ) -> Self {
        Self {
            orders,
            records,
            provider,
        }
    }

    /// Apply a payment observation to an order
    ///
    /// Marks the order paid when `received` is positive. Repeated or
    /// concurrent calls produce a single transition and a single note.
    pub async fn reconcile(
        &self,
        order_id: &str,
        received: u64,
        source: TriggerSource,
    ) -> Result<ReconcileOutcome, Error> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;

        if order.is_paid() {
            debug!("Order {} already paid", order_id);
            return Ok(ReconcileOutcome::AlreadyPaid);
        }

        if received == 0 {
            return Ok(ReconcileOutcome::Waiting);
        }

        if !self.orders.mark_paid(order_id, source.note()).await? {
            debug!("Order {} was marked paid concurrently", order_id);
            return Ok(ReconcileOutcome::AlreadyPaid);
        }

        info!(
            "Order {} paid ({} sats received, via {:?})",
            order_id, received, source
        );

        Ok(ReconcileOutcome::Paid)
    }

    /// Reconcile the order's active invoice before it is replaced or dropped
    ///
    /// Returns `true` when the order is paid afterwards. An invoice Coinos no
    /// longer knows counts as unpaid. Any other lookup failure is returned so
    /// the caller keeps the record.
    pub async fn settle_active_invoice(&self, order_id: &str) -> Result<bool, Error> {
        let Some(record) = self.records.get(order_id).await? else {
            return Ok(false);
        };

        let provider = self.provider.as_ref().ok_or(Error::ClientNotInitialized)?;

        let invoice = match provider.get_invoice(&record.invoice_hash).await {
            Ok(invoice) => invoice,
            Err(coinos_api::Error::NotFound) => {
                debug!(
                    "Active invoice {} for order {} is unknown to Coinos",
                    record.invoice_hash, order_id
                );
                return Ok(false);
            }
            Err(e) => {
                warn!(
                    "Could not check active invoice {} for order {}: {}",
                    record.invoice_hash, order_id, e
                );
                return Err(Error::CoinosApi(e));
            }
        };

        let outcome = self
            .reconcile(order_id, invoice.received, TriggerSource::Poll)
            .await?;
        Ok(outcome != ReconcileOutcome::Waiting)
    }

    /// Check the status of an order's invoice with Coinos
    pub async fn poll(&self, order_id: &str) -> Result<PollStatus, Error> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;

        if order.is_paid() {
            return Ok(PollStatus::paid());
        }

        let record = self
            .records
            .get(order_id)
            .await?
            .ok_or(Error::PaymentRecordNotFound)?;

        let provider = self.provider.as_ref().ok_or(Error::ClientNotInitialized)?;

        let invoice = provider
            .get_invoice(&record.invoice_hash)
            .await
            .map_err(|e| {
                warn!(
                    "Could not check invoice {} for order {}: {}",
                    record.invoice_hash, order_id, e
                );
                Error::CoinosApi(e)
            })?;

        match self
            .reconcile(order_id, invoice.received, TriggerSource::Poll)
            .await?
        {
            ReconcileOutcome::Paid | ReconcileOutcome::AlreadyPaid => Ok(PollStatus::paid()),
            ReconcileOutcome::Waiting => Ok(PollStatus::waiting(invoice.received, invoice.amount)),
        }
    }

    /// Apply a webhook delivery
    ///
    /// `query_order_id` is the `order_id` from the callback URL. The hash index
    /// decides which order is affected; a disagreeing query value is logged.
    pub async fn handle_webhook(
        &self,
        event: &WebhookEvent,
        query_order_id: Option<&str>,
    ) -> Result<WebhookOutcome, Error> {
        if event.hash.is_empty() {
            return Err(Error::Validation("missing invoice hash".to_string()));
        }

        let Some(order_id) = self.records.order_id_for_hash(&event.hash).await? else {
            debug!("Ignoring webhook for unknown invoice {}", event.hash);
            return Ok(WebhookOutcome::Ignored);
        };

        if let Some(query_order_id) = query_order_id {
            if query_order_id != order_id {
                warn!(
                    "Webhook for invoice {} names order {} but invoice belongs to order {}",
                    event.hash, query_order_id, order_id
                );
            }
        }

        let outcome = match self
            .reconcile(&order_id, event.received, TriggerSource::Webhook)
            .await
        {
            Ok(outcome) => outcome,
            Err(Error::OrderNotFound(_)) => {
                warn!(
                    "Invoice {} is indexed to missing order {}",
                    event.hash, order_id
                );
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        Ok(WebhookOutcome::Reconciled { order_id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::database;
    use crate::order::{MemoryOrderStore, Order, OrderStore};
    use crate::record::PaymentRecord;
    use crate::test_utils::{order, stores, MockProvider};

    struct Fixture {
        engine: ReconciliationEngine,
        orders: MemoryOrderStore,
        records: PaymentRecordStore,
        provider: Arc<MockProvider>,
    }

    fn fixture(provider: MockProvider) -> Fixture {
        let (orders, records) = stores();
        let provider = Arc::new(provider);
        let engine = ReconciliationEngine::new(
            Arc::new(orders.clone()),
            records.clone(),
            Some(provider.clone()),
        );
        Fixture {
            engine,
            orders,
            records,
            provider,
        }
    }

    async fn issue(f: &Fixture, order_id: &str, hash: &str, amount: u64) {
        f.orders.insert_order(order(order_id, 40.0));
        f.provider.insert_invoice(hash, amount, 0);
        f.records
            .put(
                order_id,
                &PaymentRecord {
                    invoice_hash: hash.to_string(),
                    payment_text: format!("lnbc_{}", hash),
                    satoshis: amount,
                    usd_amount: 40.0,
                    currency: "USD".to_string(),
                    created_at: 1_700_000_000,
                },
            )
            .await
            .unwrap();
    }

    fn event(hash: &str, received: u64) -> WebhookEvent {
        WebhookEvent {
            hash: hash.to_string(),
            received,
            secret: None,
        }
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 1000).await;

        let first = f.engine.reconcile("1", 1000, TriggerSource::Poll).await.unwrap();
        let second = f.engine.reconcile("1", 1000, TriggerSource::Poll).await.unwrap();

        assert_eq!(first, ReconcileOutcome::Paid);
        assert_eq!(second, ReconcileOutcome::AlreadyPaid);
        assert_eq!(f.orders.notes("1"), vec![TriggerSource::Poll.note()]);
    }

    #[tokio::test]
    async fn test_zero_received_never_mutates() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 1000).await;

        let outcome = f.engine.reconcile("1", 0, TriggerSource::Webhook).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Waiting);
        assert!(!f.orders.get_order("1").await.unwrap().unwrap().is_paid());
        assert!(f.orders.notes("1").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_webhook_and_poll_pay_once() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 1000).await;
        f.provider.set_received("h1", 1000);

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = f.engine.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    engine.handle_webhook(&event("h1", 1000), Some("1")).await.map(|_| ())
                } else {
                    engine.poll("1").await.map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(f.orders.get_order("1").await.unwrap().unwrap().is_paid());
        assert_eq!(f.orders.notes("1").len(), 1);
    }

    #[tokio::test]
    async fn test_poll_paid_order_skips_provider() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 1000).await;
        f.orders.mark_paid("1", "paid elsewhere").await.unwrap();

        assert_eq!(f.engine.poll("1").await.unwrap(), PollStatus::paid());
        assert_eq!(f.provider.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_poll_waiting_then_paid() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 2500).await;

        assert_eq!(
            f.engine.poll("1").await.unwrap(),
            PollStatus::waiting(0, 2500)
        );

        f.provider.set_received("h1", 2500);
        assert_eq!(f.engine.poll("1").await.unwrap(), PollStatus::paid());
        assert_eq!(f.orders.notes("1"), vec!["Lightning payment completed via Coinos"]);
    }

    #[tokio::test]
    async fn test_poll_errors() {
        let f = fixture(MockProvider::new());
        f.orders.insert_order(order("1", 10.0));
        assert!(matches!(
            f.engine.poll("1").await,
            Err(Error::PaymentRecordNotFound)
        ));
        assert!(matches!(
            f.engine.poll("missing").await,
            Err(Error::OrderNotFound(_))
        ));

        let f = fixture(MockProvider {
            fail_get: true,
            ..Default::default()
        });
        issue(&f, "1", "h1", 1000).await;
        let err = f.engine.poll("1").await.unwrap_err();
        assert!(matches!(err, Error::CoinosApi(_)));
        assert!(err.is_retryable());
        assert!(!f.orders.get_order("1").await.unwrap().unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_webhook_paths() {
        let f = fixture(MockProvider::new());
        issue(&f, "1", "h1", 1000).await;

        assert!(matches!(
            f.engine.handle_webhook(&event("", 1000), None).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(
            f.engine.handle_webhook(&event("unknown", 1000), None).await.unwrap(),
            WebhookOutcome::Ignored
        );
        assert_eq!(
            f.engine.handle_webhook(&event("h1", 0), Some("1")).await.unwrap(),
            WebhookOutcome::Reconciled {
                order_id: "1".to_string(),
                outcome: ReconcileOutcome::Waiting
            }
        );

        // The index wins over a mismatched query parameter
        assert_eq!(
            f.engine.handle_webhook(&event("h1", 1000), Some("2")).await.unwrap(),
            WebhookOutcome::Reconciled {
                order_id: "1".to_string(),
                outcome: ReconcileOutcome::Paid
            }
        );
        assert_eq!(
            f.orders.notes("1"),
            vec!["Lightning payment completed via Coinos webhook"]
        );
    }

    /// Order store whose standalone notes always fail
    struct NoteFailingStore(MemoryOrderStore);

    #[async_trait]
    impl OrderStore for NoteFailingStore {
        async fn get_order(&self, order_id: &str) -> Result<Option<Order>, database::Error> {
            self.0.get_order(order_id).await
        }

        async fn mark_paid(&self, order_id: &str, note: &str) -> Result<bool, database::Error> {
            self.0.mark_paid(order_id, note).await
        }

        async fn add_note(&self, _order_id: &str, _note: &str) -> Result<(), database::Error> {
            Err(database::Error::Backend("notes unavailable".to_string()))
        }

        async fn put_order(&self, order: Order) -> Result<(), database::Error> {
            self.0.put_order(order).await
        }
    }

    #[tokio::test]
    async fn test_paid_transition_carries_its_note() {
        let (orders, records) = stores();
        orders.insert_order(order("1", 10.0));
        let engine = ReconciliationEngine::new(
            Arc::new(NoteFailingStore(orders.clone())),
            records,
            Some(Arc::new(MockProvider::new())),
        );

        assert_eq!(
            engine.reconcile("1", 500, TriggerSource::Webhook).await.unwrap(),
            ReconcileOutcome::Paid
        );
        assert_eq!(
            engine.reconcile("1", 500, TriggerSource::Webhook).await.unwrap(),
            ReconcileOutcome::AlreadyPaid
        );
        assert_eq!(orders.notes("1"), vec![TriggerSource::Webhook.note()]);
    }

    #[tokio::test]
    async fn test_settle_active_invoice() {
        let f = fixture(MockProvider::new());
        assert!(!f.engine.settle_active_invoice("1").await.unwrap());

        issue(&f, "1", "h1", 1000).await;
        assert!(!f.engine.settle_active_invoice("1").await.unwrap());
        assert!(f.orders.notes("1").is_empty());

        f.provider.set_received("h1", 1000);
        assert!(f.engine.settle_active_invoice("1").await.unwrap());
        assert!(f.orders.get_order("1").await.unwrap().unwrap().is_paid());
        assert_eq!(f.orders.notes("1"), vec![TriggerSource::Poll.note()]);

        // Coinos forgot the invoice
        issue(&f, "2", "h2", 1000).await;
        f.provider.invoices.lock().remove("h2");
        assert!(!f.engine.settle_active_invoice("2").await.unwrap());

        let f = fixture(MockProvider {
            fail_get: true,
            ..Default::default()
        });
        issue(&f, "1", "h1", 1000).await;
        assert!(matches!(
            f.engine.settle_active_invoice("1").await,
            Err(Error::CoinosApi(_))
        ));
    }

    #[test]
    fn test_webhook_event_parsing() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"hash":"h1","received":"1500","amount":1500,"secret":"order_1"}"#,
        )
        .unwrap();
        assert_eq!(event.received, 1500);
        assert_eq!(event.secret.as_deref(), Some("order_1"));

        let event: WebhookEvent = serde_json::from_str(r#"{"hash":"h1"}"#).unwrap();
        assert_eq!(event.received, 0);

        assert!(serde_json::from_str::<WebhookEvent>(r#"{"received":10}"#).is_err());
    }
}
