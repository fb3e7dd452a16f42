//! Shared application state injected into every axum handler.

use crate::admission::AdmissionController;
use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use modelgate_kernel::registry::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<dyn Router>,
    pub admission: Arc<AdmissionController>,
    pub metrics: Arc<Metrics>,
}
