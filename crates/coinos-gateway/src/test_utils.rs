//! Shared test doubles

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coinos_api::{Account, CoinosApiError, Invoice, InvoiceAmount, InvoiceRequest};
use parking_lot::Mutex;

use crate::database::MemoryKVStore;
use crate::order::{MemoryOrderStore, Order};
use crate::provider::LightningProvider;
use crate::record::PaymentRecordStore;
use crate::util::fiat_to_sats;

/// In-memory Coinos stand-in
#[derive(Default)]
pub struct MockProvider {
    pub invoices: Mutex<HashMap<String, Invoice>>,
    pub created: Mutex<Vec<InvoiceRequest>>,
    pub get_calls: AtomicUsize,
    pub rate: Option<f64>,
    pub fail_get: bool,
    pub next_hash: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that converts fiat at `rate` and echoes it
    pub fn with_rate(rate: f64) -> Self {
        Self {
            rate: Some(rate),
            ..Default::default()
        }
    }

    pub fn set_received(&self, hash: &str, received: u64) {
        if let Some(invoice) = self.invoices.lock().get_mut(hash) {
            invoice.received = received;
        }
    }

    pub fn insert_invoice(&self, hash: &str, amount: u64, received: u64) {
        self.invoices.lock().insert(
            hash.to_string(),
            Invoice {
                id: None,
                hash: hash.to_string(),
                text: format!("lnbc_{}", hash),
                amount,
                received,
                currency: Some("USD".to_string()),
                rate: None,
                invoice_type: None,
                memo: None,
                created: None,
            },
        );
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<InvoiceRequest> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl LightningProvider for MockProvider {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice, coinos_api::Error> {
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = format!("hash-{}", n);

        let amount = match request.invoice.amount {
            InvoiceAmount::Sats(sats) => sats,
            InvoiceAmount::Fiat(fiat) => fiat_to_sats(fiat, self.rate.unwrap_or(40_000.0)),
        };

        let invoice = Invoice {
            id: Some(n.to_string()),
            hash: hash.clone(),
            text: format!("lnbc_{}", hash),
            amount,
            received: 0,
            currency: request.invoice.currency.clone(),
            rate: self.rate,
            invoice_type: Some(request.invoice.invoice_type),
            memo: request.invoice.memo.clone(),
            created: None,
        };

        self.created.lock().push(request);
        self.invoices.lock().insert(hash, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, hash: &str) -> Result<Invoice, coinos_api::Error> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get {
            return Err(coinos_api::Error::Api(CoinosApiError::from_response(
                503,
                r#"{"message":"maintenance"}"#,
            )));
        }
        self.invoices
            .lock()
            .get(hash)
            .cloned()
            .ok_or(coinos_api::Error::NotFound)
    }

    async fn get_account(&self) -> Result<Account, coinos_api::Error> {
        Ok(Account {
            id: Some("1".to_string()),
            username: "shop".to_string(),
            currency: Some("USD".to_string()),
            balance: 0,
        })
    }
}

pub fn order(id: &str, total: f64) -> Order {
    Order {
        id: id.to_string(),
        number: format!("10{}", id),
        total,
        ..Default::default()
    }
}

pub fn stores() -> (MemoryOrderStore, PaymentRecordStore) {
    (
        MemoryOrderStore::new(),
        PaymentRecordStore::new(Arc::new(MemoryKVStore::new())),
    )
}
