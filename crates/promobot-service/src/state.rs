//! Application state.

use std::sync::Arc;

use promobot_core::PlanCatalog;
use promobot_store::{CreditLedger, Store};
use promobot_telegram::Messenger;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Credit ledger over the same store.
    pub ledger: CreditLedger,

    /// The static plan catalog.
    pub catalog: Arc<PlanCatalog>,

    /// Outbound messaging for post-commit purchase notifications.
    pub messenger: Arc<dyn Messenger>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<PlanCatalog>,
        messenger: Arc<dyn Messenger>,
        config: ServiceConfig,
    ) -> Self {
        let ledger = CreditLedger::new(Arc::clone(&store));
        Self {
            store,
            ledger,
            catalog,
            messenger,
            config,
        }
    }
}
