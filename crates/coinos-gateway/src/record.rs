//! Payment records persisted per order
//!
//! Each order has at most one active [`PaymentRecord`]. It is stored under the
//! order id, and its invoice hash is indexed back to the order id in the same
//! transaction so webhooks can find the order without scanning.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{self, DynKVStore};
use crate::util::{
    COINOS_KV_HASH_NAMESPACE, COINOS_KV_PRIMARY_NAMESPACE, COINOS_KV_RECORD_NAMESPACE,
    SATS_PER_BTC,
};

/// Invoice issued for an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Provider invoice hash
    pub invoice_hash: String,
    /// Payable string shown to the payer
    pub payment_text: String,
    /// Requested amount in satoshis
    pub satoshis: u64,
    /// Order total at issue time, in `currency`
    pub usd_amount: f64,
    /// Store currency code
    pub currency: String,
    /// Unix timestamp of issuance
    pub created_at: u64,
}

impl PaymentRecord {
    /// Requested amount in BTC, for display
    pub fn btc_amount(&self) -> f64 {
        self.satoshis as f64 / SATS_PER_BTC
    }
}

/// Payment record persistence on top of a KV store
#[derive(Clone)]
pub struct PaymentRecordStore {
    kv_store: DynKVStore,
}

impl PaymentRecordStore {
    /// Create a record store
    pub fn new(kv_store: DynKVStore) -> Self {
        Self { kv_store }
    }

    /// Load the active record for an order
    pub async fn get(&self, order_id: &str) -> Result<Option<PaymentRecord>, database::Error> {
        let value = self
            .kv_store
            .kv_read(
                COINOS_KV_PRIMARY_NAMESPACE,
                COINOS_KV_RECORD_NAMESPACE,
                order_id,
            )
            .await?;

        match value {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store the active record for an order
    ///
    /// Replaces any previous record and drops its hash from the index.
    pub async fn put(&self, order_id: &str, record: &PaymentRecord) -> Result<(), database::Error> {
        let value = serde_json::to_vec(record)?;

        let mut tx = self.kv_store.begin_transaction().await?;

        let previous = tx
            .kv_read(
                COINOS_KV_PRIMARY_NAMESPACE,
                COINOS_KV_RECORD_NAMESPACE,
                order_id,
            )
            .await?;
        if let Some(previous) = previous {
            let previous: PaymentRecord = serde_json::from_slice(&previous)?;
            if previous.invoice_hash != record.invoice_hash {
                debug!(
                    "Unindexing replaced invoice {} for order {}",
                    previous.invoice_hash, order_id
                );
                tx.kv_remove(
                    COINOS_KV_PRIMARY_NAMESPACE,
                    COINOS_KV_HASH_NAMESPACE,
                    &previous.invoice_hash,
                )
                .await?;
            }
        }

        tx.kv_write(
            COINOS_KV_PRIMARY_NAMESPACE,
            COINOS_KV_RECORD_NAMESPACE,
            order_id,
            &value,
        )
        .await?;
        tx.kv_write(
            COINOS_KV_PRIMARY_NAMESPACE,
            COINOS_KV_HASH_NAMESPACE,
            &record.invoice_hash,
            order_id.as_bytes(),
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Remove the active record for an order, along with its index entry
    pub async fn remove(&self, order_id: &str) -> Result<(), database::Error> {
        let mut tx = self.kv_store.begin_transaction().await?;

        let previous = tx
            .kv_read(
                COINOS_KV_PRIMARY_NAMESPACE,
                COINOS_KV_RECORD_NAMESPACE,
                order_id,
            )
            .await?;
        let Some(previous) = previous else {
            tx.rollback().await?;
            return Ok(());
        };
        let previous: PaymentRecord = serde_json::from_slice(&previous)?;

        tx.kv_remove(
            COINOS_KV_PRIMARY_NAMESPACE,
            COINOS_KV_HASH_NAMESPACE,
            &previous.invoice_hash,
        )
        .await?;
        tx.kv_remove(
            COINOS_KV_PRIMARY_NAMESPACE,
            COINOS_KV_RECORD_NAMESPACE,
            order_id,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Find the order an invoice hash was issued for
    pub async fn order_id_for_hash(
        &self,
        invoice_hash: &str,
    ) -> Result<Option<String>, database::Error> {
        let value = self
            .kv_store
            .kv_read(
                COINOS_KV_PRIMARY_NAMESPACE,
                COINOS_KV_HASH_NAMESPACE,
                invoice_hash,
            )
            .await?;

        value
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| database::Error::Backend(format!("invalid order id: {}", e)))
            })
            .transpose()
    }
}
