//! Invoice provider seam
//!
//! The issuer and the reconciliation engine only need three provider calls.
//! [`CoinosApi`] implements them; tests substitute their own provider.

use std::sync::Arc;

use async_trait::async_trait;
use coinos_api::{Account, CoinosApi, Invoice, InvoiceRequest};

/// Provider of Lightning invoices
#[async_trait]
pub trait LightningProvider: Send + Sync {
    /// Create an invoice
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice, coinos_api::Error>;

    /// Look up an invoice by hash
    async fn get_invoice(&self, hash: &str) -> Result<Invoice, coinos_api::Error>;

    /// Fetch the receiving account, verifying credentials
    async fn get_account(&self) -> Result<Account, coinos_api::Error>;
}

/// Shared provider handle
pub type DynLightningProvider = Arc<dyn LightningProvider>;

#[async_trait]
impl LightningProvider for CoinosApi {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice, coinos_api::Error> {
        CoinosApi::create_invoice(self, request).await
    }

    async fn get_invoice(&self, hash: &str) -> Result<Invoice, coinos_api::Error> {
        CoinosApi::get_invoice(self, hash).await
    }

    async fn get_account(&self) -> Result<Account, coinos_api::Error> {
        CoinosApi::get_account(self).await
    }
}
