pub mod adapters;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;
pub mod jobs;
pub mod queue;
pub mod services;
pub mod store;

use {
    crate::{queue::QueueBackend, services::supervisor::QueueSupervisor, store::CommerceStore},
    std::{sync::Arc, time::Duration},
};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn QueueBackend>,
    pub store: Arc<dyn CommerceStore>,
    pub supervisor: QueueSupervisor,
    pub webhook_secret: Arc<str>,
    /// Default age for `POST /queues/cleanup`.
    pub retention: Duration,
}
