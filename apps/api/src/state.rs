//! # Application State
//!
//! Shared state handed to every handler. Everything inside is cheap to
//! clone: pools and clients are handles, the rest sits behind `Arc`.

use std::sync::Arc;

use tiketa_db::Database;
use tiketa_payments::PaymentProviders;

use crate::config::AppConfig;
use crate::notify::Notifier;
use crate::services::checkout::CheckoutService;
use crate::services::purchase::PurchaseService;
use crate::services::reconciliation::ReconciliationService;
use crate::services::redemption::RedemptionService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub providers: Arc<PaymentProviders>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: Database,
        providers: PaymentProviders,
        notifier: Arc<dyn Notifier>,
        config: AppConfig,
    ) -> Self {
        AppState {
            db,
            providers: Arc::new(providers),
            notifier,
            config: Arc::new(config),
        }
    }

    pub fn purchases(&self) -> PurchaseService {
        PurchaseService::new(self.db.clone(), self.config.clone())
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(self.db.clone(), self.providers.clone(), self.config.clone())
    }

    pub fn reconciliation(&self) -> ReconciliationService {
        ReconciliationService::new(self.db.clone(), self.notifier.clone())
    }

    pub fn redemption(&self) -> RedemptionService {
        RedemptionService::new(self.db.clone())
    }
}
