use std::sync::Arc;

use crate::config::Config;
use crate::gateway::PaymentGateway;
use crate::services::{InvoiceBuilder, PaymentReconciler, RefundWorkflow, SeatHoldManager};
use crate::store::InventoryStore;

/// Shared application state: the store, the gateway, and the workflow
/// services built over them. Constructed once at startup, cloned per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InventoryStore>,
    pub holds: Arc<SeatHoldManager>,
    pub invoices: Arc<InvoiceBuilder>,
    pub reconciler: Arc<PaymentReconciler>,
    pub refunds: Arc<RefundWorkflow>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: &Config,
    ) -> Self {
        Self {
            holds: Arc::new(SeatHoldManager::new(store.clone(), config.hold_duration)),
            invoices: Arc::new(InvoiceBuilder::new(
                store.clone(),
                gateway.clone(),
                config.hold_duration,
                config.payment_timeout,
            )),
            reconciler: Arc::new(PaymentReconciler::new(store.clone(), gateway.clone())),
            refunds: Arc::new(RefundWorkflow::new(
                store.clone(),
                gateway,
                config.refund_window,
            )),
            store,
        }
    }
}
