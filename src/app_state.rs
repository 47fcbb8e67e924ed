use chrono::{DateTime, Utc};

use crate::gateway::CollectionGateway;

pub struct AppState {
    pub gateway: CollectionGateway,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(gateway: CollectionGateway) -> Self {
        Self {
            gateway,
            started_at: Utc::now(),
        }
    }
}
