use std::sync::Arc;
use crate::{config::AppConfig, routes::RouteRepository, store::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub routes: RouteRepository,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            routes: RouteRepository::new(store),
        }
    }
}
