pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use crate::database::{PgStore, ReconcileStore};
use crate::services::{
    notification_service::{LogNotifier, NotificationService, Notifier},
    reconcile::ReconciliationService,
    template_service::TemplateService,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub reconciliation_service: ReconciliationService,
    pub template_service: TemplateService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
            Some(url) => Arc::new(NotificationService::new(pool.clone(), url.clone())),
            None => Arc::new(LogNotifier),
        };
        Self::with_store(Arc::new(PgStore::new(pool)), notifier)
    }

    pub fn with_store(store: Arc<dyn ReconcileStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            reconciliation_service: ReconciliationService::new(store.clone(), notifier),
            template_service: TemplateService::new(store),
        }
    }
}
