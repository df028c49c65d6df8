//! Store orders as seen by the gateway
//!
//! Orders belong to the store platform. The gateway only reads them, appends
//! notes and performs the one-way unpaid to paid transition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::database;

/// Order payment status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting payment
    #[default]
    Unpaid,
    /// Paid (terminal)
    Paid,
}

/// Store order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: String,
    /// Display number shown to the customer
    pub number: String,
    /// Order total in `currency`
    pub total: f64,
    /// ISO currency code
    pub currency: String,
    /// Payment status
    #[serde(default)]
    pub status: OrderStatus,
    /// Key the payer presents to open the checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_key: Option<String>,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            id: String::new(),
            number: String::new(),
            total: 0.0,
            currency: "USD".to_string(),
            status: OrderStatus::Unpaid,
            order_key: None,
        }
    }
}

impl Order {
    /// Whether the order has been paid
    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }
}

/// Order access provided by the store platform
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Load an order
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, database::Error>;

    /// Mark an unpaid order as paid and append `note` in the same write
    ///
    /// Returns `true` only for the call that made the transition. Unknown or
    /// already paid orders return `false` and get no note.
    async fn mark_paid(&self, order_id: &str, note: &str) -> Result<bool, database::Error>;

    /// Append a note to the order's log
    async fn add_note(&self, order_id: &str, note: &str) -> Result<(), database::Error>;

    /// Accept an order pushed by the store platform
    ///
    /// Never downgrades a paid order.
    async fn put_order(&self, order: Order) -> Result<(), database::Error>;
}

/// Shared order store handle
pub type DynOrderStore = Arc<dyn OrderStore>;

#[derive(Debug, Default)]
struct OrderEntry {
    order: Order,
    notes: Vec<String>,
}

/// In-memory order store
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, OrderEntry>>>,
}

impl MemoryOrderStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order
    ///
    /// Replacing keeps the note log and never downgrades a paid order.
    pub fn insert_order(&self, order: Order) {
        let mut orders = self.orders.write();
        match orders.get_mut(&order.id) {
            Some(entry) => {
                let paid = entry.order.is_paid();
                entry.order = order;
                if paid {
                    entry.order.status = OrderStatus::Paid;
                }
            }
            None => {
                orders.insert(
                    order.id.clone(),
                    OrderEntry {
                        order,
                        notes: Vec::new(),
                    },
                );
            }
        }
    }

    /// Notes recorded against an order
    pub fn notes(&self, order_id: &str) -> Vec<String> {
        self.orders
            .read()
            .get(order_id)
            .map(|entry| entry.notes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, database::Error> {
        Ok(self
            .orders
            .read()
            .get(order_id)
            .map(|entry| entry.order.clone()))
    }

    async fn mark_paid(&self, order_id: &str, note: &str) -> Result<bool, database::Error> {
        let mut orders = self.orders.write();
        match orders.get_mut(order_id) {
            Some(entry) if !entry.order.is_paid() => {
                entry.order.status = OrderStatus::Paid;
                entry.notes.push(note.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_note(&self, order_id: &str, note: &str) -> Result<(), database::Error> {
        let mut orders = self.orders.write();
        let entry = orders
            .get_mut(order_id)
            .ok_or_else(|| database::Error::Backend(format!("unknown order {}", order_id)))?;
        entry.notes.push(note.to_string());
        Ok(())
    }

    async fn put_order(&self, order: Order) -> Result<(), database::Error> {
        self.insert_order(order);
        Ok(())
    }
}
