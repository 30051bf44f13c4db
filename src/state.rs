use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    storage::ObjectStorage,
    store::Store,
    workflow::{ApplicationWorkflow, WorkflowSettings},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub workflow: ApplicationWorkflow,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let workflow = ApplicationWorkflow::new(
            store.clone(),
            storage.clone(),
            jwt.clone(),
            WorkflowSettings::from_config(&config),
        );
        Self {
            store,
            config: Arc::new(config),
            storage,
            jwt,
            workflow,
        }
    }
}
