use std::sync::Arc;

use crate::services::{
    accounts::AccountService, dispatcher::QueueDispatcher, job_store::JobStore,
    orchestrator::GenerationOrchestrator, webhook::WebhookRelay,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub accounts: Arc<dyn AccountService>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub relay: Arc<WebhookRelay>,
    pub dispatcher: Arc<QueueDispatcher>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        accounts: Arc<dyn AccountService>,
        orchestrator: GenerationOrchestrator,
        relay: WebhookRelay,
        dispatcher: QueueDispatcher,
    ) -> Self {
        Self {
            store,
            accounts,
            orchestrator: Arc::new(orchestrator),
            relay: Arc::new(relay),
            dispatcher: Arc::new(dispatcher),
        }
    }
}
